use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs;

use crate::document::{CaseType, Corpus, DialogueSample};
use crate::error::{KnowledgeError, KnowledgeResult};

pub const CASES_FILE: &str = "cases.csv";
pub const DIALOGUES_FILE: &str = "mapping_full.csv";

pub struct CorpusReader;

impl CorpusReader {
    /// Load `cases.csv` and `mapping_full.csv` from a data directory.
    pub async fn read_dir(data_dir: &Path) -> KnowledgeResult<Corpus> {
        let cases = Self::read_table(&data_dir.join(CASES_FILE)).await?;
        let dialogues = Self::read_table(&data_dir.join(DIALOGUES_FILE)).await?;
        Self::log_loaded(&cases, &dialogues);
        Ok(Corpus::new(cases, dialogues))
    }

    pub async fn read_table<T: DeserializeOwned>(path: &Path) -> KnowledgeResult<Vec<T>> {
        let bytes = fs::read(path).await.map_err(|e| {
            KnowledgeError::ingestion(format!("failed to read {}: {}", path.display(), e))
        })?;
        // A missing column or a malformed row is a corpus defect, same as an empty corpus.
        parse_table(&bytes).map_err(|e| {
            KnowledgeError::ingestion(format!("malformed table {}: {}", path.display(), e))
        })
    }

    fn log_loaded(cases: &[CaseType], dialogues: &[DialogueSample]) {
        tracing::info!(
            case_types = cases.len(),
            dialogues = dialogues.len(),
            "loaded fraud case corpus"
        );
    }
}

/// Parse a headed CSV table, tolerating a UTF-8 byte order mark.
pub fn parse_table<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, csv::Error> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(bytes);
    reader.deserialize().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_table_with_bom() {
        let csv = "\u{feff}id,type,desc,keywords\nC01,杀猪盘,网恋投资,\"投资,平台\"\n";
        let cases: Vec<CaseType> = parse_table(csv.as_bytes()).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].id, "C01");
        assert_eq!(cases[0].name, "杀猪盘");
        assert_eq!(cases[0].keywords, "投资,平台");
    }

    #[test]
    fn optional_dialogue_columns_may_be_absent() {
        let csv = "id,case_id,case_type,text\nD1,C01,杀猪盘,你好\n";
        let dialogues: Vec<DialogueSample> = parse_table(csv.as_bytes()).unwrap();
        assert_eq!(dialogues[0].risk_level, None);
        assert_eq!(dialogues[0].role_name, None);
    }

    #[tokio::test]
    async fn reads_corpus_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CASES_FILE), "id,type,desc,keywords\nC01,ETC,ETC 停用,ETC\n").unwrap();
        std::fs::write(
            dir.path().join(DIALOGUES_FILE),
            "id,case_id,case_type,text,risk_level,role_name\nD1,C01,ETC,您的ETC已停用,High,李奶奶\n",
        )
        .unwrap();

        let corpus = CorpusReader::read_dir(dir.path()).await.unwrap();
        assert_eq!(corpus.cases.len(), 1);
        assert_eq!(corpus.dialogues[0].role_name.as_deref(), Some("李奶奶"));
    }

    #[tokio::test]
    async fn missing_file_is_an_ingestion_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CorpusReader::read_dir(dir.path()).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Ingestion(_)));
    }

    #[tokio::test]
    async fn table_missing_a_required_column_is_an_ingestion_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CASES_FILE), "id,type,desc,keywords\nC01,ETC,ETC 停用,ETC\n").unwrap();
        std::fs::write(dir.path().join(DIALOGUES_FILE), "id,case_id,case_type\nD1,C01,ETC\n").unwrap();

        let err = CorpusReader::read_dir(dir.path()).await.unwrap_err();
        match err {
            KnowledgeError::Ingestion(message) => {
                assert!(message.contains(DIALOGUES_FILE));
                assert!(message.contains("text"));
            }
            other => panic!("expected an ingestion error, got {other:?}"),
        }
    }
}
