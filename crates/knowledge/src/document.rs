use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{KnowledgeError, KnowledgeResult};

/// Sample dialogues kept per case type when the corpus is indexed.
pub const MAX_DIALOGUES_PER_CASE: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    CaseDefinition,
    SampleDialogue,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::CaseDefinition => "cases",
            DocumentSource::SampleDialogue => "dialogues",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeDocument {
    pub id: String,
    pub text: String,
    pub category: String,
    pub keywords: Vec<String>,
    pub source: DocumentSource,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One ranked hit from a knowledge query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub id: String,
    pub category: String,
    pub snippet: String,
    /// Cosine distance, 0 means identical.
    pub distance: f32,
    pub source: DocumentSource,
}

impl RetrievalResult {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// A fraud case type definition (one row of `cases.csv`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseType {
    pub id: String,
    #[serde(rename = "type")]
    pub name: String,
    #[serde(rename = "desc", default)]
    pub description: String,
    #[serde(default)]
    pub keywords: String,
}

/// A transcribed example conversation (one row of `mapping_full.csv`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialogueSample {
    pub id: String,
    pub case_id: String,
    #[serde(default)]
    pub case_type: String,
    pub text: String,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub role_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    pub cases: Vec<CaseType>,
    pub dialogues: Vec<DialogueSample>,
}

impl Corpus {
    pub fn new(cases: Vec<CaseType>, dialogues: Vec<DialogueSample>) -> Self {
        Self { cases, dialogues }
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Check required fields and id uniqueness.
    pub fn validate(&self) -> KnowledgeResult<()> {
        if self.cases.is_empty() {
            return Err(KnowledgeError::ingestion("corpus contains no case types"));
        }

        let mut case_ids = HashSet::new();
        for (row, case) in self.cases.iter().enumerate() {
            if case.id.trim().is_empty() {
                return Err(KnowledgeError::ingestion(format!("case row {} has no id", row + 1)));
            }
            if case.name.trim().is_empty() {
                return Err(KnowledgeError::ingestion(format!(
                    "case {} has no type name",
                    case.id
                )));
            }
            if !case_ids.insert(case.id.trim()) {
                return Err(KnowledgeError::ingestion(format!("duplicate case id {}", case.id)));
            }
        }

        let mut dialogue_ids = HashSet::new();
        for (row, dialogue) in self.dialogues.iter().enumerate() {
            if dialogue.id.trim().is_empty() {
                return Err(KnowledgeError::ingestion(format!(
                    "dialogue row {} has no id",
                    row + 1
                )));
            }
            if dialogue.case_id.trim().is_empty() {
                return Err(KnowledgeError::ingestion(format!(
                    "dialogue {} has no case_id",
                    dialogue.id
                )));
            }
            if dialogue.text.trim().is_empty() {
                return Err(KnowledgeError::ingestion(format!(
                    "dialogue {} has no text",
                    dialogue.id
                )));
            }
            if !dialogue_ids.insert(dialogue.id.trim()) {
                return Err(KnowledgeError::ingestion(format!(
                    "duplicate dialogue id {}",
                    dialogue.id
                )));
            }
        }

        Ok(())
    }

    /// Turn the corpus into indexable documents: every case definition, then
    /// up to [`MAX_DIALOGUES_PER_CASE`] dialogues per case in corpus order.
    pub fn to_documents(&self) -> KnowledgeResult<Vec<KnowledgeDocument>> {
        self.validate()?;

        let mut documents = Vec::with_capacity(self.cases.len() + self.dialogues.len());
        for case in &self.cases {
            documents.push(case_document(case));
        }

        let mut by_case: HashMap<&str, Vec<&DialogueSample>> = HashMap::new();
        for dialogue in &self.dialogues {
            by_case.entry(dialogue.case_id.trim()).or_default().push(dialogue);
        }

        let known: HashSet<&str> = self.cases.iter().map(|c| c.id.trim()).collect();
        for case_id in by_case.keys().filter(|id| !known.contains(*id)) {
            tracing::warn!(case_id = %case_id, "dialogues reference an unknown case type, skipping");
        }

        for case in &self.cases {
            let Some(samples) = by_case.get(case.id.trim()) else {
                continue;
            };
            for dialogue in samples.iter().take(MAX_DIALOGUES_PER_CASE) {
                documents.push(dialogue_document(dialogue, case));
            }
        }

        Ok(documents)
    }
}

fn case_document(case: &CaseType) -> KnowledgeDocument {
    let mut metadata = BTreeMap::new();
    metadata.insert("case_id".to_string(), case.id.trim().to_string());

    KnowledgeDocument {
        id: format!("case_{}", case.id.trim()),
        text: format!(
            "诈骗类型：{}\n描述：{}\n关键词：{}",
            case.name, case.description, case.keywords
        ),
        category: case.name.trim().to_string(),
        keywords: split_keywords(&case.keywords),
        source: DocumentSource::CaseDefinition,
        metadata,
    }
}

fn dialogue_document(dialogue: &DialogueSample, case: &CaseType) -> KnowledgeDocument {
    let category = if dialogue.case_type.trim().is_empty() {
        case.name.trim().to_string()
    } else {
        dialogue.case_type.trim().to_string()
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("dialogue_id".to_string(), dialogue.id.trim().to_string());
    metadata.insert("case_id".to_string(), case.id.trim().to_string());
    if let Some(risk) = dialogue.risk_level.as_deref().filter(|r| !r.is_empty()) {
        metadata.insert("risk_level".to_string(), risk.to_string());
    }
    if let Some(role) = dialogue.role_name.as_deref().filter(|r| !r.is_empty()) {
        metadata.insert("role_name".to_string(), role.to_string());
    }

    KnowledgeDocument {
        id: format!("dialogue_{}", dialogue.id.trim()),
        text: format!("案例：{}\n对话内容：\n{}", category, dialogue.text),
        category,
        keywords: split_keywords(&case.keywords),
        source: DocumentSource::SampleDialogue,
        metadata,
    }
}

fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(|c: char| matches!(c, ',' | '，' | '、' | ';' | '；' | '|') || c.is_whitespace())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
