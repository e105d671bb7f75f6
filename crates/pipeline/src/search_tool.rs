use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use agent::{QueryInput, Tool, ToolError};
use knowledge::{KnowledgeIndex, RetrievalResult};

pub const SEARCH_TOOL_NAME: &str = "search_knowledge_base";
pub const DEFAULT_TOP_K: usize = 3;
const SNIPPET_CHARS: usize = 200;
const NO_MATCHES: &str = "未找到相关案例。";

/// Knowledge index search exposed to the profiling agent.
pub struct KnowledgeSearchTool {
    index: Arc<KnowledgeIndex>,
    top_k: usize,
}

impl KnowledgeSearchTool {
    pub fn new(index: Arc<KnowledgeIndex>, top_k: usize) -> Self {
        Self {
            index,
            top_k: top_k.max(1),
        }
    }
}

pub fn format_results(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return NO_MATCHES.to_string();
    }

    let mut output = String::from("### 检索到的相似案例：\n\n");
    for (i, result) in results.iter().enumerate() {
        let snippet: String = result.snippet.chars().take(SNIPPET_CHARS).collect();
        output.push_str(&format!("**案例 {}**: {}\n", i + 1, result.category));
        output.push_str(&format!("相似度: {:.2}\n", result.similarity()));
        output.push_str(&format!("{snippet}...\n\n"));
    }
    output
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "搜索诈骗案例知识库：在反诈骗知识库中搜索相似案例。参数 query 必须是一个描述诈骗场景或关键词的字符串。"
    }

    async fn call(&self, arguments: &Value) -> Result<String, ToolError> {
        let query = QueryInput::parse(SEARCH_TOOL_NAME, arguments)?.into_text();
        let results = self
            .index
            .query(&query, self.top_k)
            .await
            .map_err(|e| ToolError::Failed {
                tool: SEARCH_TOOL_NAME.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(query = %query, hits = results.len(), "knowledge search");
        Ok(format_results(&results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge::testing::{HashEmbedder, sample_corpus};
    use knowledge::{DEFAULT_COLLECTION, DocumentSource, FileStore};
    use serde_json::json;

    fn hit(category: &str, snippet: &str, distance: f32) -> RetrievalResult {
        RetrievalResult {
            id: format!("case_{category}"),
            category: category.to_string(),
            snippet: snippet.to_string(),
            distance,
            source: DocumentSource::CaseDefinition,
        }
    }

    #[test]
    fn formats_ranked_hits() {
        let output = format_results(&[hit("公检法", "诈骗类型：公检法", 0.1), hit("ETC", "ETC", 0.5)]);
        assert_eq!(
            output,
            "### 检索到的相似案例：\n\n**案例 1**: 公检法\n相似度: 0.90\n诈骗类型：公检法...\n\n**案例 2**: ETC\n相似度: 0.50\nETC...\n\n"
        );
    }

    #[test]
    fn snippets_are_cut_on_char_boundaries() {
        let long = "骗".repeat(300);
        let output = format_results(&[hit("公检法", &long, 0.0)]);
        assert!(output.contains(&format!("{}...", "骗".repeat(200))));
        assert!(!output.contains(&"骗".repeat(201)));
    }

    #[test]
    fn no_hits_has_a_fixed_message() {
        assert_eq!(format_results(&[]), NO_MATCHES);
    }

    #[tokio::test]
    async fn searches_the_index_with_any_accepted_shape() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(KnowledgeIndex::new(
            Arc::new(FileStore::new(dir.path())),
            Arc::new(HashEmbedder::new(64)),
            DEFAULT_COLLECTION,
        ));
        let tool = KnowledgeSearchTool::new(index.clone(), DEFAULT_TOP_K);
        assert_eq!(tool.call(&json!("洗钱")).await.unwrap(), NO_MATCHES);

        index.rebuild(&sample_corpus()).await.unwrap();
        let output = tool
            .call(&json!({ "query": { "description": "您好，您的ETC认证已经过期，请点击短信链接重新认证" } }))
            .await
            .unwrap();
        assert!(output.starts_with("### 检索到的相似案例"));
        assert!(output.contains("**案例 1**: ETC"));
        assert_eq!(output.matches("**案例").count(), 3);

        let err = tool.call(&json!({ "text": "ETC" })).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
