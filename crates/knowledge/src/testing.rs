//! Deterministic, network-free helpers for tests and offline runs.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::document::{CaseType, Corpus, DialogueSample};
use crate::embeddings::Embedder;
use crate::error::KnowledgeResult;

/// Bag of character bigrams hashed into `dimension` buckets, L2-normalized.
/// Identical text always yields identical vectors.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();

        let mut bump = |gram: &[char]| {
            let mut hasher = DefaultHasher::new();
            gram.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        };

        if chars.len() == 1 {
            bump(&chars[..]);
        }
        for gram in chars.windows(2) {
            bump(gram);
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn model_id(&self) -> &str {
        "hash-bigram"
    }
}

/// A small two-category corpus used across the workspace's tests.
pub fn sample_corpus() -> Corpus {
    let cases = vec![
        CaseType {
            id: "C01".to_string(),
            name: "公检法".to_string(),
            description: "冒充公安机关称账户涉嫌洗钱，要求转账到安全账户".to_string(),
            keywords: "洗钱,安全账户,通缉令".to_string(),
        },
        CaseType {
            id: "C02".to_string(),
            name: "ETC".to_string(),
            description: "谎称ETC认证失效，诱导点击链接填写银行卡信息".to_string(),
            keywords: "ETC,认证,链接".to_string(),
        },
    ];
    let dialogues = vec![
        DialogueSample {
            id: "D01".to_string(),
            case_id: "C01".to_string(),
            case_type: "公检法".to_string(),
            text: "我是市公安局的，你的银行卡涉嫌洗钱，马上把钱转到安全账户".to_string(),
            risk_level: Some("Critical".to_string()),
            role_name: Some("李奶奶".to_string()),
        },
        DialogueSample {
            id: "D02".to_string(),
            case_id: "C02".to_string(),
            case_type: "ETC".to_string(),
            text: "您好，您的ETC认证已经过期，请点击短信链接重新认证".to_string(),
            risk_level: Some("High".to_string()),
            role_name: Some("王师傅".to_string()),
        },
    ];
    Corpus::new(cases, dialogues)
}
