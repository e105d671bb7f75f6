use serde::Serialize;

pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Persona and budget of one reasoning agent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub temperature: f32,
    /// Upper bound on reasoning rounds, tool rounds included.
    pub max_iterations: usize,
}

impl AgentProfile {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_iterations: 3,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn system_prompt(&self) -> String {
        format!(
            r#"你是{role}。
{backstory}

你的目标：{goal}

请使用中文回答。需要查询资料时调用提供的工具；信息充分后直接给出最终答案。"#,
            role = self.role,
            backstory = self.backstory,
            goal = self.goal,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_prompt() {
        let profile = AgentProfile::new("watchdog", "安全监测员", "识别风险", "经验丰富")
            .with_max_iterations(0);
        assert_eq!(profile.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(profile.max_iterations, 1);

        let prompt = profile.system_prompt();
        assert!(prompt.starts_with("你是安全监测员。"));
        assert!(prompt.contains("你的目标：识别风险"));
        assert!(prompt.contains("经验丰富"));
    }
}
