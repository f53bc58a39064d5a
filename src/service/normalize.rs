//! 物料描述分词
//!
//! 供应商描述 ("Plywood 4x8 3/4\" CDX sheets, 10 ea") 与目录名称 ("CDX Plywood")
//! 走同一套规则, 得到可比较的词集合。

use indexmap::IndexSet;

/// 计量单位, 不参与匹配
const UNIT_TOKENS: &[&str] = &[
    "ea", "each", "pc", "pcs", "sht", "shts", "lf", "ft", "in", "inch", "yd", "m", "mm", "cm",
    "kg", "g", "lb", "lbs", "oz", "gal", "l", "ltr", "sf", "sqft", "sy", "cy", "bx", "pk", "pkg",
    "ctn", "hr", "hrs",
];

/// 停用词
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "the", "of", "for", "with", "w", "to", "on", "by", "per", "x", "or",
];

/// 分词: 小写, 去尺寸/数字, 去标点, 去单位与停用词, 复数还原
///
/// 结果保持首次出现的顺序并去重。
pub fn tokenize(text: &str) -> IndexSet<String> {
    let lower = text.to_lowercase();
    let mut tokens = IndexSet::new();

    for raw in lower.split_whitespace() {
        if is_dimension(raw) {
            continue;
        }
        for part in raw.split(|c: char| !c.is_alphanumeric()) {
            if part.is_empty() || part.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if UNIT_TOKENS.contains(&part) || STOP_WORDS.contains(&part) {
                continue;
            }
            let folded = fold_plural(part);
            if folded.chars().count() < 2 {
                continue;
            }
            tokens.insert(folded);
        }
    }

    tokens
}

/// 尺寸类写法: 2x4, 4x8, 3/4", 12mm, 10', 1.5
fn is_dimension(raw: &str) -> bool {
    let trimmed = raw.trim_start_matches(|c: char| matches!(c, '(' | '[' | '#' | '@' | '~'));
    trimmed.chars().next().map_or(false, |c| c.is_ascii_digit())
        || (trimmed.starts_with('.') && trimmed.chars().nth(1).map_or(false, |c| c.is_ascii_digit()))
}

fn fold_plural(token: &str) -> String {
    let len = token.chars().count();
    if len > 4 && token.ends_with("ies") {
        return format!("{}y", &token[..token.len() - 3]);
    }
    if len > 3 && token.ends_with('s') && !token.ends_with("ss") && !token.ends_with("us") {
        return token[..token.len() - 1].to_string();
    }
    token.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<String> {
        tokenize(text).into_iter().collect()
    }

    #[test]
    fn drops_dimensions_units_and_punctuation() {
        assert_eq!(words("Plywood 4x8 3/4\" CDX sheets, 10 ea"), vec!["plywood", "cdx", "sheet"]);
        assert_eq!(words("2x4 Lumber - 8ft SPF"), vec!["lumber", "spf"]);
        assert_eq!(words("Rebar #4 (12mm) 20' lengths"), vec!["rebar", "length"]);
    }

    #[test]
    fn folds_plurals_lightly() {
        assert_eq!(words("Screws"), vec!["screw"]);
        assert_eq!(words("Glass"), vec!["glass"]);
        assert_eq!(words("Supplies"), vec!["supply"]);
        assert_eq!(words("Gypsum"), vec!["gypsum"]);
    }

    #[test]
    fn drops_stop_words_and_dedups() {
        assert_eq!(words("Box of the nails and nails"), vec!["box", "nail"]);
        assert!(tokenize("10 ea").is_empty());
        assert!(tokenize("").is_empty());
    }
}
