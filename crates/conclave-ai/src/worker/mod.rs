//! Worker Agent Loop (C11, spec §4.6): a bounded ReAct loop that reasons,
//! optionally calls tools, and returns once it produces a schema-valid
//! final output or exhausts its bounds. Failure modes other than local
//! faults are recoverable: they surface as events, not panics.

use std::collections::HashMap;
use std::sync::Arc;

use conclave_contracts::{AgentId, SessionId, ToolId};
use conclave_models::{Agent, EventPayload, ModelProfile, Tool};
use conclave_traits::{
    CompletionRequest, EventSink, GovernanceCheck, LlmClient, ToolInvocation, ToolsGateway,
};
use serde_json::{json, Value};

use crate::context::{CompileForAgentRequest, ContextCompiler};
use crate::reasoning;
use crate::schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Completed,
    Incomplete,
    Error,
}

pub struct WorkerInput {
    pub original_input: Option<Value>,
    pub prior_outputs: HashMap<AgentId, Value>,
    pub from_agent_id: Option<AgentId>,
}

#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub status: WorkerStatus,
    pub output: Option<Value>,
    pub iterations_used: usize,
    pub tool_calls_made: usize,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

/// Worker (C11) wired to one agent's model profile, allowed tools, and the
/// seams it consults each iteration: an LLM, the Tools Gateway, the
/// Governance Enforcer, the Event Log, and the Context Compiler.
pub struct WorkerLoop {
    agent: Agent,
    model_profile: ModelProfile,
    llm: Arc<dyn LlmClient>,
    tools: Vec<Tool>,
    tools_gateway: Arc<dyn ToolsGateway>,
    governance: Arc<dyn GovernanceCheck>,
    event_sink: Arc<dyn EventSink>,
    compiler: Arc<ContextCompiler>,
    validation_failure_limit: u32,
}

impl WorkerLoop {
    pub fn new(
        agent: Agent,
        model_profile: ModelProfile,
        llm: Arc<dyn LlmClient>,
        tools: Vec<Tool>,
        tools_gateway: Arc<dyn ToolsGateway>,
        governance: Arc<dyn GovernanceCheck>,
        event_sink: Arc<dyn EventSink>,
        compiler: Arc<ContextCompiler>,
    ) -> Self {
        Self {
            agent,
            model_profile,
            llm,
            tools,
            tools_gateway,
            governance,
            event_sink,
            compiler,
            validation_failure_limit: 3,
        }
    }

    pub fn with_validation_failure_limit(mut self, limit: u32) -> Self {
        self.validation_failure_limit = limit;
        self
    }

    pub async fn run(&self, session_id: &SessionId, input: WorkerInput) -> WorkerOutcome {
        let mut observations: Vec<Value> = Vec::new();
        let mut tool_calls_made = 0usize;
        let mut validation_failures: u32 = 0;
        let mut warnings = Vec::new();
        let max_iterations = self.agent.loop_bounds.max_iterations.max(1);

        for iteration in 1..=max_iterations {
            let decision = self
                .governance
                .check_iteration_limit(&self.agent.agent_id, iteration, max_iterations)
                .await;
            if !decision.allowed {
                let reason = decision
                    .violation_reason
                    .unwrap_or_else(|| "max iterations reached".to_string());
                warnings.push(reason.clone());
                self.emit(
                    session_id,
                    EventPayload::PolicyViolation {
                        violation_type: "max_iterations".into(),
                        subject_agent: self.agent.agent_id.clone(),
                        target: self.agent.agent_id.as_str().to_string(),
                        reason,
                    },
                )
                .await;
                self.emit(
                    session_id,
                    EventPayload::AgentCompleted {
                        agent_id: self.agent.agent_id.clone(),
                        status: "incomplete".into(),
                    },
                )
                .await;
                return WorkerOutcome {
                    status: WorkerStatus::Incomplete,
                    output: None,
                    iterations_used: iteration - 1,
                    tool_calls_made,
                    error: None,
                    warnings,
                };
            }

            let compiled = self
                .compiler
                .compile_for_agent(CompileForAgentRequest {
                    agent: &self.agent,
                    session_id,
                    original_input: input.original_input.clone(),
                    prior_outputs: input.prior_outputs.clone(),
                    observations: observations.clone(),
                    from_agent_id: if iteration == 1 {
                        input.from_agent_id.clone()
                    } else {
                        None
                    },
                    memory_query: None,
                    artifact_requests: Vec::new(),
                    noise_event_types: Vec::new(),
                })
                .await;
            for event in compiled.events {
                self.emit(session_id, event).await;
            }

            let governance_decision = self.governance.record_llm_call().await;
            if !governance_decision.allowed {
                warnings.push(
                    governance_decision
                        .violation_reason
                        .unwrap_or_else(|| "llm call budget exceeded".to_string()),
                );
                return WorkerOutcome {
                    status: WorkerStatus::Incomplete,
                    output: None,
                    iterations_used: iteration,
                    tool_calls_made,
                    error: None,
                    warnings,
                };
            }

            let request = self.build_request(&compiled.compiled_context);
            let response = match self.llm.complete(request).await {
                Ok(response) => response,
                Err(err) => {
                    return WorkerOutcome {
                        status: WorkerStatus::Error,
                        output: None,
                        iterations_used: iteration,
                        tool_calls_made,
                        error: Some(err.to_string()),
                        warnings,
                    };
                }
            };

            let Some(parsed) = reasoning::extract_json(&response.content) else {
                self.emit(
                    session_id,
                    EventPayload::LlmResponseParseError {
                        agent_id: self.agent.agent_id.clone(),
                        raw_response: response.content.clone(),
                    },
                )
                .await;
                let fallback = json!({
                    "error": "llm_response_parse_error",
                    "raw_response": response.content,
                });
                self.emit(
                    session_id,
                    EventPayload::AgentCompleted {
                        agent_id: self.agent.agent_id.clone(),
                        status: "incomplete".into(),
                    },
                )
                .await;
                return WorkerOutcome {
                    status: WorkerStatus::Incomplete,
                    output: Some(fallback),
                    iterations_used: iteration,
                    tool_calls_made,
                    error: Some("llm_response_parse_error".into()),
                    warnings,
                };
            };

            let action_type = parsed
                .pointer("/action/type")
                .and_then(Value::as_str)
                .unwrap_or_default();

            match action_type {
                "use_tools" => {
                    let requests = parsed
                        .pointer("/action/tool_requests")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    for request in requests {
                        let tool_id = ToolId::new(
                            request
                                .get("tool_id")
                                .and_then(Value::as_str)
                                .unwrap_or_default(),
                        );
                        let arguments = request.get("arguments").cloned().unwrap_or(Value::Null);
                        tool_calls_made += self
                            .invoke_tool(session_id, &tool_id, arguments, &mut observations)
                            .await;
                    }
                }
                "final_output" => {
                    let output = parsed
                        .pointer("/action/output")
                        .cloned()
                        .unwrap_or(Value::Null);
                    let violations = schema::validate(&self.agent.output_schema, &output);
                    if violations.is_empty() {
                        self.emit(
                            session_id,
                            EventPayload::AgentCompleted {
                                agent_id: self.agent.agent_id.clone(),
                                status: "completed".into(),
                            },
                        )
                        .await;
                        return WorkerOutcome {
                            status: WorkerStatus::Completed,
                            output: Some(output),
                            iterations_used: iteration,
                            tool_calls_made,
                            error: None,
                            warnings,
                        };
                    }
                    validation_failures += 1;
                    if validation_failures >= self.validation_failure_limit {
                        self.emit(
                            session_id,
                            EventPayload::ValidationFailureLimitExceeded {
                                agent_id: self.agent.agent_id.clone(),
                                attempts: validation_failures,
                            },
                        )
                        .await;
                        self.emit(
                            session_id,
                            EventPayload::AgentCompleted {
                                agent_id: self.agent.agent_id.clone(),
                                status: "incomplete".into(),
                            },
                        )
                        .await;
                        return WorkerOutcome {
                            status: WorkerStatus::Incomplete,
                            output: Some(output),
                            iterations_used: iteration,
                            tool_calls_made,
                            error: Some(format!("output schema validation failed: {violations:?}")),
                            warnings,
                        };
                    }
                    warnings.push(format!(
                        "validation failure {validation_failures}/{}",
                        self.validation_failure_limit
                    ));
                    observations.push(json!({
                        "type": "validation_failure",
                        "errors": violations,
                    }));
                }
                other => {
                    self.emit(
                        session_id,
                        EventPayload::LlmResponseParseError {
                            agent_id: self.agent.agent_id.clone(),
                            raw_response: format!("unknown action type '{other}': {response_content}", response_content = response.content),
                        },
                    )
                    .await;
                    return WorkerOutcome {
                        status: WorkerStatus::Incomplete,
                        output: None,
                        iterations_used: iteration,
                        tool_calls_made,
                        error: Some(format!("unknown action type '{other}'")),
                        warnings,
                    };
                }
            }
        }

        warnings.push("max iterations reached without a final_output".to_string());
        WorkerOutcome {
            status: WorkerStatus::Incomplete,
            output: None,
            iterations_used: max_iterations,
            tool_calls_made,
            error: None,
            warnings,
        }
    }

    async fn invoke_tool(
        &self,
        session_id: &SessionId,
        tool_id: &ToolId,
        arguments: Value,
        observations: &mut Vec<Value>,
    ) -> usize {
        let decision = self
            .governance
            .check_tool_access(&self.agent.agent_id, tool_id)
            .await;
        if !decision.allowed {
            let reason = decision
                .violation_reason
                .unwrap_or_else(|| "tool access denied".to_string());
            self.emit(
                session_id,
                EventPayload::PolicyViolation {
                    violation_type: "tool_access".into(),
                    subject_agent: self.agent.agent_id.clone(),
                    target: tool_id.as_str().to_string(),
                    reason: reason.clone(),
                },
            )
            .await;
            observations.push(json!({
                "type": "tool_denied",
                "tool_id": tool_id.as_str(),
                "reason": reason,
            }));
            return 0;
        }

        self.emit(
            session_id,
            EventPayload::ToolInvoked {
                agent_id: self.agent.agent_id.clone(),
                tool_id: tool_id.clone(),
            },
        )
        .await;

        match self
            .tools_gateway
            .invoke(ToolInvocation {
                tool_id: tool_id.clone(),
                arguments,
            })
            .await
        {
            Ok(outcome) => {
                self.emit(
                    session_id,
                    EventPayload::ToolResult {
                        agent_id: self.agent.agent_id.clone(),
                        tool_id: tool_id.clone(),
                        success: outcome.success,
                    },
                )
                .await;
                observations.push(json!({
                    "type": "tool_result",
                    "tool_id": tool_id.as_str(),
                    "success": outcome.success,
                    "output": outcome.output,
                }));
                1
            }
            Err(err) => {
                self.emit(
                    session_id,
                    EventPayload::ToolResult {
                        agent_id: self.agent.agent_id.clone(),
                        tool_id: tool_id.clone(),
                        success: false,
                    },
                )
                .await;
                observations.push(json!({
                    "type": "tool_error",
                    "tool_id": tool_id.as_str(),
                    "error": err.to_string(),
                }));
                0
            }
        }
    }

    fn build_request(&self, compiled: &conclave_models::CompiledContext) -> CompletionRequest {
        let tool_catalog: Vec<Value> = self
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "tool_id": tool.tool_id.as_str(),
                    "input_schema": tool.input_schema,
                })
            })
            .collect();

        let system = format!(
            "You are agent '{agent_id}'. {description}\n\n\
             Respond with a single JSON object shaped exactly as:\n\
             {{\"reasoning\": string, \"action\": {{\"type\": \"use_tools\"|\"final_output\", \
             \"tool_requests\"?: [{{\"tool_id\": string, \"arguments\": object}}], \"output\"?: object}}}}\n\n\
             Available tools: {tools}\n\
             Required output shape: {output_schema}",
            agent_id = self.agent.agent_id,
            description = self.agent.description,
            tools = Value::Array(tool_catalog),
            output_schema = self.agent.output_schema,
        );

        let user = json!({
            "original_input": compiled.original_input,
            "prior_outputs": compiled.prior_outputs,
            "observations": compiled.observations,
            "memories": compiled.memories,
            "artifacts": compiled.artifacts,
        })
        .to_string();

        let mut request = CompletionRequest::new(vec![
            conclave_traits::Message::system(system),
            conclave_traits::Message::user(user),
        ])
        .with_json_mode(self.model_profile.json_mode);
        if let Some(temperature) = self.model_profile.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.model_profile.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }

    async fn emit(&self, session_id: &SessionId, payload: EventPayload) {
        let event = conclave_models::Event::new(String::new(), session_id.clone(), chrono::Utc::now(), payload);
        if let Err(err) = self.event_sink.record(session_id, event).await {
            tracing::warn!(error = %err, "failed to record worker event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextCompiler, HeuristicTokenEstimator};
    use crate::llm::MockLlmClient;
    use async_trait::async_trait;
    use conclave_models::{
        ArtifactAccessMode, ContextRequirements, LoopBounds, ModelProfile, Provider,
    };
    use conclave_traits::{
        EventSinkError, GovernanceDecision, ToolGatewayError, ToolOutcome,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AllowAllGovernance;
    #[async_trait]
    impl GovernanceCheck for AllowAllGovernance {
        async fn check_agent_invocation(&self, _from: &AgentId, _to: &AgentId) -> GovernanceDecision {
            GovernanceDecision::allow()
        }
        async fn check_tool_access(&self, _agent_id: &AgentId, _tool_id: &ToolId) -> GovernanceDecision {
            GovernanceDecision::allow()
        }
        async fn check_iteration_limit(
            &self,
            _agent_id: &AgentId,
            iteration: usize,
            max_iterations: usize,
        ) -> GovernanceDecision {
            if iteration > max_iterations {
                GovernanceDecision::deny("max iterations reached")
            } else {
                GovernanceDecision::allow()
            }
        }
        async fn record_llm_call(&self) -> GovernanceDecision {
            GovernanceDecision::allow()
        }
    }

    struct NullEventSink;
    #[async_trait]
    impl EventSink for NullEventSink {
        async fn record(
            &self,
            _session_id: &SessionId,
            _event: conclave_models::Event,
        ) -> Result<(), EventSinkError> {
            Ok(())
        }
    }

    struct EchoToolsGateway {
        calls: AtomicUsize,
    }
    #[async_trait]
    impl ToolsGateway for EchoToolsGateway {
        async fn invoke(
            &self,
            invocation: ToolInvocation,
        ) -> Result<ToolOutcome, ToolGatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutcome {
                tool_id: invocation.tool_id,
                success: true,
                output: json!({"echo": invocation.arguments}),
                duration_ms: 1,
            })
        }
    }

    fn agent(max_iterations: usize) -> Agent {
        Agent {
            agent_id: AgentId::new("fraud_agent"),
            description: "Flags suspicious claims".into(),
            capabilities: vec![],
            allowed_tools: vec![ToolId::new("lookup")],
            allowed_agents: vec![],
            model_profile_id: conclave_contracts::ModelProfileId::new("gpt-main"),
            loop_bounds: LoopBounds {
                max_iterations,
                iteration_timeout_seconds: 30,
            },
            input_schema: None,
            output_schema: json!({"type": "object", "required": ["decision"]}),
            context_requirements: ContextRequirements {
                max_context_tokens: 4000,
                requires_prior_outputs: vec![],
                budget_allocation: None,
                artifact_access_mode: ArtifactAccessMode::OnDemand,
            },
        }
    }

    fn model_profile() -> ModelProfile {
        ModelProfile {
            model_profile_id: conclave_contracts::ModelProfileId::new("gpt-main"),
            provider: Provider::OpenAi,
            model_name: "gpt-test".into(),
            temperature: None,
            max_tokens: None,
            top_p: None,
            json_mode: true,
            timeout_seconds: 30,
            retry_policy: Default::default(),
        }
    }

    fn compiler() -> Arc<ContextCompiler> {
        Arc::new(ContextCompiler::new(
            None,
            Arc::new(HeuristicTokenEstimator),
            vec![],
        ))
    }

    #[tokio::test]
    async fn completes_on_valid_final_output() {
        let llm = Arc::new(MockLlmClient::new(
            "gpt-test",
            vec![crate::llm::MockStep::Text(
                json!({"reasoning": "done", "action": {"type": "final_output", "output": {"decision": "approve"}}}).to_string(),
            )],
        ));
        let worker = WorkerLoop::new(
            agent(5),
            model_profile(),
            llm,
            vec![],
            Arc::new(EchoToolsGateway { calls: AtomicUsize::new(0) }),
            Arc::new(AllowAllGovernance),
            Arc::new(NullEventSink),
            compiler(),
        );
        let outcome = worker
            .run(
                &SessionId::new("s1"),
                WorkerInput {
                    original_input: Some(json!({"claim": "x"})),
                    prior_outputs: HashMap::new(),
                    from_agent_id: None,
                },
            )
            .await;
        assert_eq!(outcome.status, WorkerStatus::Completed);
        assert_eq!(outcome.output.unwrap()["decision"], "approve");
        assert_eq!(outcome.iterations_used, 1);
    }

    #[tokio::test]
    async fn retries_on_invalid_output_until_limit() {
        let llm = Arc::new(MockLlmClient::new(
            "gpt-test",
            vec![crate::llm::MockStep::Text(
                json!({"reasoning": "bad", "action": {"type": "final_output", "output": {}}}).to_string(),
            )],
        ));
        let worker = WorkerLoop::new(
            agent(5),
            model_profile(),
            llm,
            vec![],
            Arc::new(EchoToolsGateway { calls: AtomicUsize::new(0) }),
            Arc::new(AllowAllGovernance),
            Arc::new(NullEventSink),
            compiler(),
        )
        .with_validation_failure_limit(2);
        let outcome = worker
            .run(
                &SessionId::new("s1"),
                WorkerInput {
                    original_input: None,
                    prior_outputs: HashMap::new(),
                    from_agent_id: None,
                },
            )
            .await;
        assert_eq!(outcome.status, WorkerStatus::Incomplete);
        assert_eq!(outcome.iterations_used, 2);
    }

    #[tokio::test]
    async fn invokes_tool_then_completes() {
        let llm = Arc::new(MockLlmClient::new(
            "gpt-test",
            vec![
                crate::llm::MockStep::Text(
                    json!({"reasoning": "need data", "action": {"type": "use_tools", "tool_requests": [{"tool_id": "lookup", "arguments": {"id": 1}}]}}).to_string(),
                ),
                crate::llm::MockStep::Text(
                    json!({"reasoning": "done", "action": {"type": "final_output", "output": {"decision": "approve"}}}).to_string(),
                ),
            ],
        ));
        let worker = WorkerLoop::new(
            agent(5),
            model_profile(),
            llm,
            vec![],
            Arc::new(EchoToolsGateway { calls: AtomicUsize::new(0) }),
            Arc::new(AllowAllGovernance),
            Arc::new(NullEventSink),
            compiler(),
        );
        let outcome = worker
            .run(
                &SessionId::new("s1"),
                WorkerInput {
                    original_input: None,
                    prior_outputs: HashMap::new(),
                    from_agent_id: None,
                },
            )
            .await;
        assert_eq!(outcome.status, WorkerStatus::Completed);
        assert_eq!(outcome.tool_calls_made, 1);
        assert_eq!(outcome.iterations_used, 2);
    }

    #[tokio::test]
    async fn max_iterations_terminates_incomplete() {
        let llm = Arc::new(MockLlmClient::new(
            "gpt-test",
            vec![crate::llm::MockStep::Text(
                json!({"reasoning": "thinking", "action": {"type": "use_tools", "tool_requests": []}}).to_string(),
            )],
        ));
        let worker = WorkerLoop::new(
            agent(2),
            model_profile(),
            llm,
            vec![],
            Arc::new(EchoToolsGateway { calls: AtomicUsize::new(0) }),
            Arc::new(AllowAllGovernance),
            Arc::new(NullEventSink),
            compiler(),
        );
        let outcome = worker
            .run(
                &SessionId::new("s1"),
                WorkerInput {
                    original_input: None,
                    prior_outputs: HashMap::new(),
                    from_agent_id: None,
                },
            )
            .await;
        assert_eq!(outcome.status, WorkerStatus::Incomplete);
    }
}
