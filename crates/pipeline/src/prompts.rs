use agent::AgentProfile;

use crate::error::TemplateError;
use crate::stage::{StageDefinition, StageId};
use crate::template::Template;

pub fn watchdog() -> AgentProfile {
    AgentProfile::new(
        "watchdog",
        "反诈骗监控专家",
        "快速扫描通话文本，识别诈骗高危信号并给出风险等级",
        "你在反诈中心值守多年，听过上万通诈骗电话。你对\"安全账户\"、\"验证码\"、\"涉嫌洗钱\"、\"屏幕共享\"这类话术极其敏感，能在几句话内判断来电者的真实意图。",
    )
    .with_max_iterations(3)
}

pub fn profiler() -> AgentProfile {
    AgentProfile::new(
        "profiler",
        "诈骗手法侧写师",
        "结合监控结果与知识库中的真实案例，确定这通电话属于哪一类诈骗",
        "你整理过大量诈骗案卷，熟悉公检法、杀猪盘、ETC 认证、虚假客服等各类手法的剧本与变种。你总是先检索相似案例，再下结论。",
    )
    .with_max_iterations(5)
}

pub fn guardian() -> AgentProfile {
    AgentProfile::new(
        "guardian",
        "反诈守护者",
        "根据受害者的身份与弱点，写出对方听得懂、记得住、能立刻照做的防御话术",
        "你是社区反诈宣传员，常年和老人、学生、外卖员打交道。你知道说教没有用，只有贴近对方生活的具体提醒才能让人停下转账的手。",
    )
    .with_max_iterations(3)
}

const MONITOR_TEMPLATE: &str = r#"请分析以下通话转录文本，判断其中是否存在诈骗风险。

通话内容：
{transcript_text}

分析要点：
1. 是否冒充公检法、银行、客服、领导或熟人
2. 是否要求转账、提供验证码、下载软件或共享屏幕
3. 是否制造紧迫感或以法律后果相威胁
4. 是否索要身份证、银行卡等敏感信息"#;

const MONITOR_EXPECTED: &str = r#"一份简短的风险评估，必须包含一行：
风险等级: Critical / High / Medium / Safe（四选一，使用英文）
并列出识别到的高危信号及对应原话。"#;

const PROFILE_TEMPLATE: &str = r#"根据监控专家的分析结果和原始通话内容，判断这通电话属于哪种诈骗类型。

监控结果：
{monitor_result}

通话内容：
{transcript_text}

请先调用知识库搜索工具检索相似案例，再对比话术特征作出判断。"#;

const PROFILE_EXPECTED: &str = r#"侧写报告，第一行必须严格使用如下格式（英文冒号）：
诈骗类型: <类型名称>
随后说明匹配到的相似案例、关键话术特征以及判断依据。"#;

const DEFEND_TEMPLATE: &str = r#"请为以下潜在受害者生成个性化的防御建议。

受害者信息：
- 称呼：{victim_name}
- 年龄：{victim_age}
- 身份：{victim_tag}
- 弱点：{victim_weakness}

监控结果：
{monitor_result}

侧写结果：
{profile_result}

要求：
1. 用受害者能听懂的语言，避免专业术语
2. 针对其弱点点明骗子的套路
3. 给出可以立即执行的具体步骤（如挂断电话、拨打 96110、联系家人）"#;

const DEFEND_EXPECTED: &str = r#"一段直接对受害者说的防御话术，包含：
- 一句醒目的警示
- 骗局拆穿（结合其身份与弱点）
- 三条以内的立即行动建议"#;

fn stage(
    id: StageId,
    agent: AgentProfile,
    source: &str,
    expected_output: &str,
    depends_on: Vec<StageId>,
    uses_knowledge: bool,
) -> Result<StageDefinition, TemplateError> {
    Ok(StageDefinition {
        id,
        agent,
        template: Template::parse(id.as_str(), source, id.declared_fields())?,
        expected_output: expected_output.to_string(),
        depends_on,
        uses_knowledge,
    })
}

/// Monitor, Profile and Defend, declared in execution order.
pub fn standard_stages() -> Result<Vec<StageDefinition>, TemplateError> {
    Ok(vec![
        stage(StageId::Monitor, watchdog(), MONITOR_TEMPLATE, MONITOR_EXPECTED, vec![], false)?,
        stage(
            StageId::Profile,
            profiler(),
            PROFILE_TEMPLATE,
            PROFILE_EXPECTED,
            vec![StageId::Monitor],
            true,
        )?,
        stage(
            StageId::Defend,
            guardian(),
            DEFEND_TEMPLATE,
            DEFEND_EXPECTED,
            vec![StageId::Monitor, StageId::Profile],
            false,
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::RiskLevel;

    #[test]
    fn every_template_parses_against_its_declared_fields() {
        let stages = standard_stages().unwrap();
        for stage in &stages {
            let declared = stage.id.declared_fields();
            assert!(stage.template.fields().all(|f| declared.contains(&f)));
        }
        let defend: Vec<_> = stages[2].template.fields().collect();
        assert_eq!(defend.len(), 6);
    }

    #[test]
    fn only_the_profile_stage_searches_knowledge() {
        let stages = standard_stages().unwrap();
        let with_tool: Vec<_> = stages.iter().filter(|s| s.uses_knowledge).map(|s| s.id).collect();
        assert_eq!(with_tool, vec![StageId::Profile]);
    }

    #[test]
    fn budgets_follow_agent_roles() {
        assert_eq!(watchdog().max_iterations, 3);
        assert_eq!(profiler().max_iterations, 5);
        assert_eq!(guardian().max_iterations, 3);
    }

    #[test]
    fn expected_outputs_carry_the_extraction_markers() {
        assert!(PROFILE_EXPECTED.contains("诈骗类型: "));
        for level in RiskLevel::PRIORITY {
            assert!(MONITOR_EXPECTED.contains(level.as_str()));
        }
    }
}
