use crate::config::PipelineConfig;
use crate::db::{CatalogReader, Store};
use crate::error::{PipelineError, Result};
use crate::models::{CatalogEntry, MaterialMatch};
use crate::service::normalize::tokenize;
use crate::service::notify::{PipelineEvent, StatusNotifier};
use chrono::Utc;
use indexmap::IndexSet;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// 目录中一个物料的预处理结果: 名称与每个同义词各自的词集合
#[derive(Debug, Clone)]
struct IndexedMaterial {
    entry: CatalogEntry,
    category_key: Option<String>,
    variants: Vec<IndexSet<String>>,
}

/// 某一时刻的物料目录快照 (只含 active 物料)
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    materials: Vec<IndexedMaterial>,
}

impl CatalogSnapshot {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let materials = entries
            .into_iter()
            .filter(|e| e.material.active)
            .map(|entry| {
                let variants: Vec<IndexSet<String>> = std::iter::once(entry.material.name.as_str())
                    .chain(entry.material.synonyms.iter().map(String::as_str))
                    .map(tokenize)
                    .filter(|tokens| !tokens.is_empty())
                    .collect();
                IndexedMaterial {
                    category_key: entry.material.category.as_deref().map(category_key),
                    entry,
                    variants,
                }
            })
            .collect();
        Self { materials }
    }

    /// 从目录读取接口加载
    pub async fn load<R: CatalogReader + ?Sized>(reader: &R) -> Result<Self> {
        Ok(Self::new(reader.catalog_snapshot().await?))
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// 候选集: 分类提示命中某个有物料的分类时只取该分类, 否则全目录
    fn candidates(&self, category_hint: Option<&str>) -> Vec<&IndexedMaterial> {
        if let Some(hint) = category_hint.map(category_key).filter(|h| !h.is_empty()) {
            let in_category: Vec<&IndexedMaterial> = self
                .materials
                .iter()
                .filter(|m| m.category_key.as_deref() == Some(hint.as_str()))
                .collect();
            if !in_category.is_empty() {
                return in_category;
            }
        }
        self.materials.iter().collect()
    }
}

fn category_key(category: &str) -> String {
    category.trim().to_lowercase()
}

/// 描述词集合与一个名称变体的相似度: 0.5 * 覆盖率 + 0.5 * Dice 系数
///
/// 覆盖率 = 变体词在描述中出现的比例。结果保留 4 位小数。
pub fn similarity(description: &IndexSet<String>, variant: &IndexSet<String>) -> f64 {
    if description.is_empty() || variant.is_empty() {
        return 0.0;
    }
    let common = variant.iter().filter(|t| description.contains(*t)).count() as f64;
    let coverage = common / variant.len() as f64;
    let dice = 2.0 * common / (description.len() + variant.len()) as f64;
    round4(0.5 * coverage + 0.5 * dice)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// 候选排序: 分数高者优先, 其次历史匹配数多者, 最后 id 小者
fn rank(a: &(f64, &IndexedMaterial), b: &(f64, &IndexedMaterial)) -> Ordering {
    a.0.total_cmp(&b.0)
        .then(a.1.entry.match_count.cmp(&b.1.entry.match_count))
        .then(b.1.entry.material.id.cmp(&a.1.entry.material.id))
}

/// 物料匹配器 (纯函数, 给定快照结果确定)
#[derive(Debug, Clone, Copy)]
pub struct MaterialMatcher {
    min_score: f64,
}

impl Default for MaterialMatcher {
    fn default() -> Self {
        Self { min_score: 0.5 }
    }
}

impl MaterialMatcher {
    pub fn new(min_score: f64) -> Self {
        Self { min_score }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.match_threshold)
    }

    pub fn match_description(
        &self,
        snapshot: &CatalogSnapshot,
        description: &str,
        category_hint: Option<&str>,
    ) -> Option<MaterialMatch> {
        let tokens = tokenize(description);
        if tokens.is_empty() {
            return None;
        }

        // 候选物料并行评分
        snapshot
            .candidates(category_hint)
            .par_iter()
            .map(|m| {
                let score = m
                    .variants
                    .iter()
                    .map(|v| similarity(&tokens, v))
                    .fold(0.0_f64, f64::max);
                (score, *m)
            })
            .filter(|(score, _)| *score >= self.min_score)
            .max_by(rank)
            .map(|(score, m)| MaterialMatch {
                material_id: m.entry.material.id,
                confidence: score,
            })
    }
}

/// 单张报价的匹配统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub quote_id: i64,
    pub matched: usize,
    pub unmatched: usize,
}

/// 审批后的物料匹配服务
pub struct MatcherService {
    store: Arc<dyn Store>,
    matcher: MaterialMatcher,
    notifier: StatusNotifier,
}

impl MatcherService {
    pub fn new(store: Arc<dyn Store>, matcher: MaterialMatcher, notifier: StatusNotifier) -> Self {
        Self {
            store,
            matcher,
            notifier,
        }
    }

    /// 匹配已审批报价的全部 material 行, 一次写回 (含未匹配)
    ///
    /// 重复执行只会用当前目录覆盖上一次的结果。
    pub async fn run_for_quote(&self, quote_id: i64) -> Result<MatchSummary> {
        let start = Instant::now();

        let quote = self
            .store
            .get_quote(quote_id)
            .await?
            .ok_or(PipelineError::not_found("quote", quote_id))?;
        if !quote.verified {
            return Err(PipelineError::InvalidInput(format!(
                "quote {} is not approved, refusing to match",
                quote_id
            )));
        }

        let line_items = self.store.list_line_items(quote_id).await?;
        let snapshot = CatalogSnapshot::load(self.store.as_ref()).await?;
        tracing::debug!(
            "quote {}: matching {} lines against {} catalog materials",
            quote_id,
            line_items.len(),
            snapshot.len()
        );

        let results: Vec<(i64, Option<MaterialMatch>)> = line_items
            .iter()
            .filter(|li| li.fields.is_material())
            .map(|li| {
                let found = self.matcher.match_description(
                    &snapshot,
                    &li.fields.description,
                    li.fields.category_hint.as_deref(),
                );
                (li.id, found)
            })
            .collect();

        let now = Utc::now();
        self.store.record_matches(quote_id, &results, now).await?;

        let matched = results.iter().filter(|(_, m)| m.is_some()).count();
        let summary = MatchSummary {
            quote_id,
            matched,
            unmatched: results.len() - matched,
        };
        self.notifier.publish(PipelineEvent::QuoteMatched {
            quote_id,
            matched: summary.matched,
            unmatched: summary.unmatched,
            at: now,
        });
        tracing::info!(
            "Quote {} matched: {} matched, {} unmatched (耗时: {:.2}s)",
            quote_id,
            summary.matched,
            summary.unmatched,
            start.elapsed().as_secs_f64()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Material;

    fn entry(id: i64, name: &str, category: Option<&str>, synonyms: &[&str], match_count: i64) -> CatalogEntry {
        CatalogEntry {
            material: Material {
                id,
                name: name.to_string(),
                category: category.map(str::to_string),
                synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
                active: true,
            },
            match_count,
        }
    }

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::new(vec![
            entry(1, "CDX Plywood", Some("Lumber"), &["plywood sheathing"], 0),
            entry(2, "SPF Stud", Some("Lumber"), &["spf lumber", "stud"], 0),
            entry(3, "Drywall Screw", Some("Fasteners"), &["gypsum screw"], 0),
            entry(4, "Portland Cement", Some("Concrete"), &[], 0),
        ])
    }

    #[test]
    fn similarity_combines_coverage_and_dice() {
        let desc = tokenize("CDX plywood sheet");
        let name = tokenize("CDX Plywood");
        // coverage 1.0, dice 2*2/(3+2) = 0.8
        assert_eq!(similarity(&desc, &name), 0.9);
        assert_eq!(similarity(&desc, &IndexSet::new()), 0.0);
    }

    #[test]
    fn matches_supplier_wording_to_catalog() {
        let matcher = MaterialMatcher::default();
        let snap = catalog();
        let m = matcher
            .match_description(&snap, "Plywood 4x8 3/4\" CDX sheets, 10 ea", None)
            .unwrap();
        assert_eq!(m.material_id, 1);
        assert_eq!(m.confidence, 0.9);

        let m = matcher.match_description(&snap, "2x4 Lumber - 8ft SPF", None).unwrap();
        assert_eq!(m.material_id, 2);
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn below_threshold_is_unmatched() {
        let matcher = MaterialMatcher::default();
        assert_eq!(matcher.match_description(&catalog(), "Delivery to site", None), None);
        assert_eq!(matcher.match_description(&catalog(), "10 ea", None), None);
    }

    #[test]
    fn category_hint_prefilters_with_fallback() {
        let snap = CatalogSnapshot::new(vec![
            entry(1, "Screw", Some("Fasteners"), &[], 0),
            entry(2, "Screw Anchor", Some("Anchors"), &[], 0),
        ]);
        let matcher = MaterialMatcher::new(0.1);

        let m = matcher.match_description(&snap, "screw anchor", Some(" fasteners ")).unwrap();
        assert_eq!(m.material_id, 1);

        // 提示的分类不存在时退回全目录
        let m = matcher.match_description(&snap, "screw anchor", Some("Plumbing")).unwrap();
        assert_eq!(m.material_id, 2);
    }

    #[test]
    fn ties_prefer_popular_then_lower_id() {
        let matcher = MaterialMatcher::default();
        let snap = CatalogSnapshot::new(vec![
            entry(5, "Rebar", None, &[], 1),
            entry(7, "Rebar", None, &[], 3),
            entry(9, "Rebar", None, &[], 3),
        ]);
        assert_eq!(matcher.match_description(&snap, "rebar", None).unwrap().material_id, 7);

        let snap = CatalogSnapshot::new(vec![entry(9, "Rebar", None, &[], 0), entry(4, "Rebar", None, &[], 0)]);
        assert_eq!(matcher.match_description(&snap, "rebar", None).unwrap().material_id, 4);
    }

    #[test]
    fn inactive_materials_are_not_candidates() {
        let mut inactive = entry(1, "Rebar", None, &[], 0);
        inactive.material.active = false;
        let snap = CatalogSnapshot::new(vec![inactive]);
        assert!(snap.is_empty());
        assert_eq!(MaterialMatcher::default().match_description(&snap, "rebar", None), None);
    }

    #[test]
    fn matching_is_deterministic() {
        let matcher = MaterialMatcher::default();
        let snap = catalog();
        let first = matcher.match_description(&snap, "Drywall screws 1-5/8\"", Some("fasteners"));
        for _ in 0..20 {
            assert_eq!(matcher.match_description(&snap, "Drywall screws 1-5/8\"", Some("fasteners")), first);
        }
        assert_eq!(first.map(|m| m.material_id), Some(3));
    }
}
