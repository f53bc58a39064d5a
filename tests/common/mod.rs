#![allow(dead_code)]

use async_trait::async_trait;
use quote_normalizer::config::PipelineConfig;
use quote_normalizer::models::ExtractionPayload;
use quote_normalizer::service::{ExtractionClient, LocalObjectStorage, Pipeline, TaskReceiver};
use quote_normalizer::{MemoryStore, PipelineError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// 抽取服务的预设行为, 按文件名选择
#[derive(Debug, Clone)]
pub enum Script {
    Payload(Value),
    Fail(String),
    Hang,
}

#[derive(Default)]
pub struct ScriptedExtraction {
    scripts: Mutex<HashMap<String, Script>>,
    calls: AtomicUsize,
}

impl ScriptedExtraction {
    pub fn with(self, file_name: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(file_name.to_string(), script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionClient for ScriptedExtraction {
    async fn extract(&self, file_name: &str, _bytes: Vec<u8>) -> Result<ExtractionPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().get(file_name).cloned();
        match script {
            Some(Script::Payload(value)) => {
                serde_json::from_value(value).map_err(|e| PipelineError::MalformedPayload(e.to_string()))
            }
            Some(Script::Fail(message)) => Err(PipelineError::Extraction(message)),
            Some(Script::Hang) => futures::future::pending().await,
            None => Err(PipelineError::Extraction(format!("no script for {}", file_name))),
        }
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub rx: TaskReceiver,
    pub store: Arc<MemoryStore>,
    pub extraction: Arc<ScriptedExtraction>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(extraction: ScriptedExtraction) -> Self {
        let store = Arc::new(MemoryStore::new());
        seed_catalog(&store);

        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalObjectStorage::new(dir.path()));
        let extraction = Arc::new(extraction);
        let config = PipelineConfig {
            extraction_timeout_secs: 1,
            ..Default::default()
        };
        let (pipeline, rx) = Pipeline::new(store.clone(), storage, extraction.clone(), &config);

        Self {
            pipeline,
            rx,
            store,
            extraction,
            _dir: dir,
        }
    }

    /// 顺序执行队列中的全部任务
    pub async fn drain(&mut self) -> usize {
        self.pipeline.worker().drain(&mut self.rx).await
    }
}

pub fn seed_catalog(store: &MemoryStore) {
    store.add_material("CDX Plywood", Some("Lumber"), &["plywood sheathing"]);
    store.add_material("SPF Stud", Some("Lumber"), &["spf lumber"]);
    store.add_material("Drywall Screw", Some("Fasteners"), &["gypsum screw"]);
}

/// 第一行算术错误 (10 x 5 != 40) 的报价
pub fn quote_with_bad_line() -> Value {
    json!({
        "status": "ok",
        "model": "scripted",
        "supplier": { "name": "Acme Building Supply", "email": "sales@acme.test" },
        "quote": {
            "quote_number": "Q-1001",
            "quote_date": "2024-03-15",
            "subtotal": "255.00",
            "delivery_cost": "0",
            "tax_amount": "0",
            "total_amount": "$255.00",
            "currency": "usd"
        },
        "line_items": [
            { "description": "Plywood 4x8 3/4\" CDX sheets", "quantity": 10, "unit": "sht",
              "unit_price": "$5.00", "line_total": 40, "confidence": 0.95 },
            { "description": "2x4 Lumber - 8ft SPF", "quantity": 20, "unit": "ea",
              "unit_price": 10, "line_total": 200, "confidence": 0.9 },
            { "description": "Job site signage", "quantity": 1, "unit": "ea",
              "unit_price": 15, "line_total": 15, "confidence": 0.92 }
        ],
        "confidence": { "supplier": 0.98, "totals": 0.97 }
    })
}

/// 算术全部一致的报价, 含一行 10% 折扣
pub fn clean_quote() -> Value {
    json!({
        "supplier": { "name": "acme building supply " },
        "quote": {
            "quote_date": "2024-04-02",
            "subtotal": "1000.00",
            "delivery_cost": "50.00",
            "tax_amount": "70.00",
            "tax_rate": "7",
            "total_amount": "1120.00"
        },
        "line_items": [
            { "description": "CDX plywood sheets", "quantity": 20, "unit_price": "50.00",
              "discount_pct": 10, "line_total": "900.00", "category": "Lumber" },
            { "description": "Drywall screws 1-5/8\"", "quantity": 10, "unit_price": "10.00",
              "line_total": "100.00" }
        ],
        "confidence": { "totals": 0.99 }
    })
}
