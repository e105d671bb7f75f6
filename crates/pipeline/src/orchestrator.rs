use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use agent::{AgentRuntime, Completion, ToolSet};
use knowledge::KnowledgeIndex;

use crate::error::{GraphError, PipelineError, PipelineResult, TranscriptionError};
use crate::extractor::{extract_risk_level, extract_scam_type};
use crate::graph::StageGraph;
use crate::prompts;
use crate::result::AnalysisResult;
use crate::search_tool::{DEFAULT_TOP_K, KnowledgeSearchTool};
use crate::stage::{ExtractedFields, StageId, StageOutput};
use crate::template::{TemplateContext, fields};
use crate::transcript::{Transcriber, Transcript};
use crate::victim::ProfileStore;

/// Runs Monitor, Profile and Defend over one transcript.
///
/// Stages run strictly one after another in graph order. Each stage sees
/// only the raw text of the stages it depends on. Any stage failure aborts
/// the whole analysis.
pub struct Pipeline {
    runtime: AgentRuntime,
    graph: StageGraph,
    profiles: Arc<dyn ProfileStore>,
    knowledge_tools: ToolSet,
}

impl Pipeline {
    pub fn new(
        runtime: AgentRuntime,
        index: Arc<KnowledgeIndex>,
        profiles: Arc<dyn ProfileStore>,
    ) -> PipelineResult<Self> {
        Self::with_top_k(runtime, index, profiles, DEFAULT_TOP_K)
    }

    pub fn with_top_k(
        runtime: AgentRuntime,
        index: Arc<KnowledgeIndex>,
        profiles: Arc<dyn ProfileStore>,
        top_k: usize,
    ) -> PipelineResult<Self> {
        let graph = StageGraph::new(prompts::standard_stages()?)?;
        let knowledge_tools = ToolSet::new().with(Arc::new(KnowledgeSearchTool::new(index, top_k)));
        Ok(Self {
            runtime,
            graph,
            profiles,
            knowledge_tools,
        })
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn profiles(&self) -> &dyn ProfileStore {
        self.profiles.as_ref()
    }

    /// Transcribe `audio` and analyze the result. Transcription failures
    /// surface before any stage runs.
    pub async fn analyze_audio(
        &self,
        transcriber: &dyn Transcriber,
        audio: &Path,
        role_id: &str,
    ) -> PipelineResult<AnalysisResult> {
        let started = Instant::now();
        let transcript = transcriber.transcribe(audio).await?;
        info!(
            path = %audio.display(),
            chars = transcript.text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transcription complete"
        );
        self.analyze(transcript, role_id).await
    }

    pub async fn analyze(&self, transcript: Transcript, role_id: &str) -> PipelineResult<AnalysisResult> {
        if transcript.is_empty() {
            return Err(TranscriptionError::Empty.into());
        }

        let victim = self.profiles.resolve(role_id);
        info!(role_id, victim = %victim.name, "starting analysis");

        let mut context = TemplateContext::new()
            .bind(fields::TRANSCRIPT_TEXT, transcript.text.clone())
            .bind_victim(&victim);
        let mut outputs: HashMap<StageId, StageOutput> = HashMap::new();
        let mut order = Vec::new();

        for stage in self.graph.stages() {
            // Guaranteed by the graph order; checked so a broken graph fails loudly.
            if let Some(missing) = stage.depends_on.iter().find(|d| !outputs.contains_key(*d)) {
                return Err(PipelineError::Graph(GraphError::UnknownDependency {
                    stage: stage.id,
                    dependency: *missing,
                }));
            }

            let rendered = stage.template.render(&context)?;
            let instruction = stage.instruction(&rendered);
            let tools = if stage.uses_knowledge {
                self.knowledge_tools.clone()
            } else {
                ToolSet::new()
            };

            info!(stage = %stage.id, agent = %stage.agent.name, "stage started");
            let started = Instant::now();
            let output = self
                .runtime
                .invoke(&stage.agent, &instruction, &tools)
                .await
                .map_err(|source| {
                    warn!(stage = %stage.id, error = %source, "stage failed");
                    PipelineError::Stage {
                        stage: stage.id,
                        source,
                    }
                })?;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if let Completion::Partial(reason) = output.completion {
                warn!(stage = %stage.id, ?reason, "stage returned a partial answer");
            }
            info!(
                stage = %stage.id,
                elapsed_ms,
                iterations = output.iterations,
                tool_calls = output.tool_calls,
                "stage finished"
            );

            let fields = match stage.id {
                StageId::Monitor => Some(ExtractedFields {
                    risk_level: Some(extract_risk_level(&output.text)),
                    scam_type: None,
                }),
                StageId::Profile => Some(ExtractedFields {
                    risk_level: None,
                    scam_type: Some(extract_scam_type(&output.text)),
                }),
                StageId::Defend => None,
            };

            if let Some(field) = stage.id.output_field() {
                context.insert(field, output.text.clone());
            }
            order.push(stage.id);
            outputs.insert(
                stage.id,
                StageOutput {
                    stage: stage.id,
                    raw: output.text,
                    completion: output.completion,
                    elapsed_ms,
                    tool_calls: output.tool_calls,
                    fields,
                },
            );
        }

        let risk_level = extract_risk_level(raw_text(&outputs, StageId::Monitor));
        let scam_type = extract_scam_type(raw_text(&outputs, StageId::Profile));
        let defense_advice = raw_text(&outputs, StageId::Defend).to_string();

        info!(%risk_level, scam_type = %scam_type, "analysis complete");

        let raw_outputs = order.iter().filter_map(|id| outputs.remove(id)).collect();
        Ok(AnalysisResult {
            transcript: transcript.text,
            segments: transcript.segments,
            duration: transcript.duration,
            risk_level,
            scam_type,
            defense_advice,
            victim_profile: victim,
            raw_outputs,
        })
    }
}

fn raw_text(outputs: &HashMap<StageId, StageOutput>, id: StageId) -> &str {
    outputs.get(&id).map(|o| o.raw.as_str()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::RiskLevel;
    use crate::search_tool::SEARCH_TOOL_NAME;
    use crate::victim::{CsvProfileStore, Role, VictimProfile};
    use agent::testing::{FnBackend, ScriptedBackend};
    use agent::{
        AgentError, BackendError, ChatMessage, ChatRequest, ChatResponse, RetryPolicy, ToolCall,
    };
    use knowledge::testing::{HashEmbedder, sample_corpus};
    use knowledge::{DEFAULT_COLLECTION, FileStore};
    use serde_json::json;
    use std::time::Duration;

    const MONITOR_REPLY: &str = "风险等级: Critical\n冒充公安，要求转账到安全账户。也许不是 Safe。";
    const PROFILE_REPLY: &str = "诈骗类型: 公检法\n匹配案例：冒充公安机关";
    const DEFEND_REPLY: &str = "李奶奶，请立刻挂断电话！";

    fn system_prompt(request: &ChatRequest) -> &str {
        match request.messages.first() {
            Some(ChatMessage::System(prompt)) => prompt.as_str(),
            _ => "",
        }
    }

    fn last_is_tool_result(request: &ChatRequest) -> bool {
        matches!(request.messages.last(), Some(ChatMessage::Tool { .. }))
    }

    /// Answers per agent persona; the profiler searches once before answering.
    fn persona_backend() -> Arc<dyn agent::ChatBackend> {
        Arc::new(FnBackend::new(|request: &ChatRequest| {
            let prompt = system_prompt(request);
            let reply = if prompt.contains(&prompts::watchdog().role) {
                ChatResponse::text(MONITOR_REPLY)
            } else if prompt.contains(&prompts::profiler().role) {
                if last_is_tool_result(request) {
                    ChatResponse::text(PROFILE_REPLY)
                } else {
                    ChatResponse {
                        content: String::new(),
                        tool_calls: vec![ToolCall {
                            id: None,
                            name: SEARCH_TOOL_NAME.to_string(),
                            arguments: json!({ "query": "公安 洗钱 安全账户" }),
                        }],
                    }
                }
            } else {
                ChatResponse::text(DEFEND_REPLY)
            };
            Ok(reply)
        }))
    }

    fn roles() -> Arc<dyn ProfileStore> {
        Arc::new(CsvProfileStore::from_roles(vec![Role {
            id: "R01".to_string(),
            profile: VictimProfile {
                name: "李奶奶".to_string(),
                age: "72".to_string(),
                tag: "独居老人".to_string(),
                weakness: "关心孙辈".to_string(),
            },
        }]))
    }

    async fn pipeline_with(backend: Arc<dyn agent::ChatBackend>, dir: &Path) -> Pipeline {
        let index = Arc::new(KnowledgeIndex::new(
            Arc::new(FileStore::new(dir)),
            Arc::new(HashEmbedder::new(64)),
            DEFAULT_COLLECTION,
        ));
        index.rebuild(&sample_corpus()).await.unwrap();
        let runtime = AgentRuntime::new(backend, RetryPolicy::none(), Duration::from_secs(5));
        Pipeline::new(runtime, index, roles()).unwrap()
    }

    fn call() -> Transcript {
        Transcript::from_text("我是市公安局的，你的银行卡涉嫌洗钱，马上转到安全账户")
    }

    #[tokio::test]
    async fn three_stages_produce_a_complete_result() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(persona_backend(), dir.path()).await;

        let result = pipeline.analyze(call(), "R01").await.unwrap();

        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert_eq!(result.scam_type, "公检法");
        assert_eq!(result.defense_advice, DEFEND_REPLY);
        assert_eq!(result.victim_profile.name, "李奶奶");
        assert!(!result.is_partial());

        let order: Vec<_> = result.raw_outputs.iter().map(|o| o.stage).collect();
        assert_eq!(order, vec![StageId::Monitor, StageId::Profile, StageId::Defend]);
        assert_eq!(result.stage(StageId::Profile).unwrap().raw, PROFILE_REPLY);
    }

    #[tokio::test]
    async fn downstream_stages_see_upstream_text_and_only_profile_gets_tools() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(ChatResponse::text(MONITOR_REPLY)),
            Ok(ChatResponse::text(PROFILE_REPLY)),
            Ok(ChatResponse::text(DEFEND_REPLY)),
        ]));
        let pipeline = pipeline_with(backend.clone(), dir.path()).await;

        pipeline.analyze(call(), "R01").await.unwrap();

        let requests = backend.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].tools.is_empty());
        assert_eq!(requests[1].tools.len(), 1);
        assert!(requests[2].tools.is_empty());

        let user_text = |request: &ChatRequest| match &request.messages[1] {
            ChatMessage::User(text) => text.clone(),
            _ => String::new(),
        };
        assert!(user_text(&requests[0]).contains("涉嫌洗钱"));
        assert!(user_text(&requests[1]).contains(MONITOR_REPLY));
        let defend = user_text(&requests[2]);
        assert!(defend.contains(MONITOR_REPLY));
        assert!(defend.contains(PROFILE_REPLY));
        assert!(defend.contains("独居老人"));
    }

    #[tokio::test]
    async fn profiler_out_of_budget_still_yields_a_partial_result() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FnBackend::new(|request: &ChatRequest| {
            let prompt = system_prompt(request);
            let reply = if prompt.contains(&prompts::watchdog().role) {
                ChatResponse::text(MONITOR_REPLY)
            } else if prompt.contains(&prompts::profiler().role) {
                if request.tools.is_empty() {
                    ChatResponse::text(PROFILE_REPLY)
                } else {
                    ChatResponse {
                        content: "诈骗类型: 公检法（仍在检索）".to_string(),
                        tool_calls: vec![ToolCall {
                            id: None,
                            name: SEARCH_TOOL_NAME.to_string(),
                            arguments: json!({ "query": "公安 安全账户" }),
                        }],
                    }
                }
            } else {
                ChatResponse::text(DEFEND_REPLY)
            };
            Ok(reply)
        }));
        let pipeline = pipeline_with(backend, dir.path()).await;

        let result = pipeline.analyze(call(), "R01").await.unwrap();

        assert!(result.is_partial());
        let profile = result.stage(StageId::Profile).unwrap();
        assert_eq!(profile.completion, Completion::Partial(agent::PartialReason::BudgetExhausted));
        assert_eq!(profile.tool_calls, prompts::profiler().max_iterations);
        assert_eq!(result.scam_type, "公检法");
        assert_eq!(result.defense_advice, DEFEND_REPLY);
        assert_eq!(result.stage(StageId::Monitor).unwrap().completion, Completion::Complete);
    }

    #[tokio::test]
    async fn unknown_role_uses_the_default_profile() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(persona_backend(), dir.path()).await;

        let result = pipeline.analyze(call(), "R99").await.unwrap();

        assert_eq!(result.victim_profile, VictimProfile::default());
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn identical_runs_extract_identical_fields() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(persona_backend(), dir.path()).await;

        let first = pipeline.analyze(call(), "R01").await.unwrap();
        let second = pipeline.analyze(call(), "R01").await.unwrap();

        assert_eq!(first.risk_level, second.risk_level);
        assert_eq!(first.scam_type, second.scam_type);
    }

    #[tokio::test]
    async fn a_failed_stage_aborts_the_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(ChatResponse::text(MONITOR_REPLY)),
            Err(BackendError::Status {
                status: 401,
                body: "bad key".to_string(),
            }),
        ]));
        let pipeline = pipeline_with(backend.clone(), dir.path()).await;

        let err = pipeline.analyze(call(), "R01").await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Stage {
                stage: StageId::Profile,
                source: AgentError::Backend { .. }
            }
        ));
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn empty_transcript_is_rejected_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::always("unused"));
        let pipeline = pipeline_with(backend.clone(), dir.path()).await;

        let err = pipeline.analyze(Transcript::from_text("  "), "R01").await.unwrap_err();

        assert!(matches!(err, PipelineError::Transcription(TranscriptionError::Empty)));
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn missing_audio_fails_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::always("unused"));
        let pipeline = pipeline_with(backend.clone(), dir.path()).await;

        let err = pipeline
            .analyze_audio(&crate::transcript::TranscriptFileReader, &dir.path().join("none.mp3"), "R01")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Transcription(TranscriptionError::NotFound(_))));
        assert_eq!(backend.request_count(), 0);
    }

    #[test]
    fn serialized_result_omits_raw_outputs() {
        let result = AnalysisResult {
            transcript: "t".to_string(),
            segments: Vec::new(),
            duration: 0.0,
            risk_level: RiskLevel::High,
            scam_type: "ETC".to_string(),
            defense_advice: "挂断".to_string(),
            victim_profile: VictimProfile::default(),
            raw_outputs: vec![StageOutput {
                stage: StageId::Monitor,
                raw: "High".to_string(),
                completion: Completion::Complete,
                elapsed_ms: 1,
                tool_calls: 0,
                fields: None,
            }],
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("raw_outputs").is_none());
        assert_eq!(value["risk_level"], "High");
        assert_eq!(value["victim_info"]["name"], "用户");
        assert!(value.get("transcript_segments").is_some());
    }
}
