//! The tutoring workflow: answer, decide whether the user wants practice, then
//! plan, draft and finalize practice problems.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::conversation_state::{ConversationState, Intent, Message, Role};
use super::parser::{parse_answer_and_question, parse_practice_problems, ParseError, PartialDecode};
use crate::graph::{BoxError, CompiledGraph, GraphError, Router, StateGraph, Step, END};
use crate::llm_client::{GenerateOptions, LanguageModel, ProviderError};

pub const ASSISTANT: &str = "assistant";
pub const TUTOR: &str = "tutor";
pub const DRAFT_PRACTICE_PROBLEMS: &str = "draft_practice_problems";
pub const FINALIZE_PRACTICE_PROBLEMS: &str = "finalize_practice_problems";

const ASSISTANT_PROMPT: &str = "You are a helpful assistant. ";

const INTENT_PROMPT: &str = "In the following conversation, is the user EXPLICITLY seeking help or practice? \
If so, respond with `{ \"continue\": true }`. If the user is not seeking help or practice, respond with \
`{ \"continue\": false }`. Only respond in JSON format with the single field `continue`, which is a boolean value.";

const TUTOR_PROMPT: &str = "You are a tutor. Given the user's prompt, in first person, think about what to do to \
address it, be detailed, and have a plan. You do not need to actually address the prompt now, just think about \
plans. Ask yourself what questions could help you understand the user's intent better. Respond in this format: \
`\"address_prompt\": \"<your thought>\", \"questions_for_user\": [\"<question 1>\", \"<question 2>\"]`";

const DRAFT_PROMPT: &str = "You are a tutor. Draft up practice problems. Format your answer by using \
<practice> </practice> tags. Each practice problem MUST be inside its own <practice> </practice> tag.";

fn summary_prompt(initial_prompt: &str) -> String {
    format!(
        "Summarize what's going on in these practice problems. Don't answer them, just give a summary of what \
the user would learn. Write it as if you are talking to the user. Also address the user's initial prompt \
which is: \n {}",
        initial_prompt
    )
}

fn finalize_prompt(problem: &str) -> String {
    format!(
        "You are a tutor. You have access to KaTeX and mhchem, expressions are delimited by $$. Please use LaTeX \
for math expressions and chemical formulas. Given the following practice problem, create an answer, then the \
question for that answer. The answer MUST be inside its own <answer> </answer> tag, and the question MUST be \
inside its own <question> </question> tag. All tags MUST be closed. The practice problem is:\n\n {}",
        problem
    )
}

#[derive(Debug, Error)]
pub enum TutorError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("could not decode model output: {0}")]
    Decode(#[from] ParseError),

    #[error("could not decode intent: {0}")]
    Intent(#[from] serde_json::Error),

    #[error("conversation has no human message")]
    MissingHumanMessage,
}

/// What finalize does with a problem whose question/answer tags fail to decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ItemDecodePolicy {
    /// Fail the whole run.
    Abort,
    /// Drop the problem and keep going.
    SkipItem,
    /// Keep the problem with whichever fields were recovered.
    #[default]
    RecordPartial,
}

/// Replies to the latest human message.
pub struct Assistant {
    model: Arc<dyn LanguageModel>,
}

#[async_trait]
impl Step<ConversationState> for Assistant {
    async fn run(&self, cancel: &CancellationToken, state: &mut ConversationState) -> Result<(), BoxError> {
        let latest = state
            .last_message_of(Role::Human)
            .ok_or(TutorError::MissingHumanMessage)?
            .clone();
        let response = self
            .model
            .generate(
                cancel,
                &[Message::system(ASSISTANT_PROMPT), latest],
                GenerateOptions::with_temperature(0.0),
            )
            .await
            .map_err(TutorError::from)?;
        state.add_assistant_message(&response);
        Ok(())
    }
}

/// Sends the transcript to the model and continues to the tutor only when the
/// user is explicitly asking for help.
pub struct IntentRouter {
    model: Arc<dyn LanguageModel>,
}

#[async_trait]
impl Router<ConversationState> for IntentRouter {
    async fn route(&self, cancel: &CancellationToken, state: &ConversationState) -> Result<Vec<String>, BoxError> {
        let mut messages = state.get_messages().to_vec();
        messages.push(Message::system(INTENT_PROMPT));

        let response = self
            .model
            .generate(cancel, &messages, GenerateOptions::with_temperature(0.0))
            .await
            .map_err(TutorError::from)?;
        let intent: Intent = serde_json::from_str(response.trim()).map_err(TutorError::from)?;
        info!(continue_flag = intent.continue_flag, "Classified intent");

        if intent.continue_flag {
            Ok(vec![TUTOR.to_string()])
        } else {
            Ok(vec![END.to_string()])
        }
    }
}

/// Plans how to address the conversation's opening request.
pub struct Tutor {
    model: Arc<dyn LanguageModel>,
}

#[async_trait]
impl Step<ConversationState> for Tutor {
    async fn run(&self, cancel: &CancellationToken, state: &mut ConversationState) -> Result<(), BoxError> {
        let first = state
            .first_message_of(Role::Human)
            .ok_or(TutorError::MissingHumanMessage)?
            .clone();
        let plan = self
            .model
            .generate(
                cancel,
                &[Message::system(TUTOR_PROMPT), first],
                GenerateOptions::with_temperature(0.5),
            )
            .await
            .map_err(TutorError::from)?;
        debug!("Tutor plan: {}", plan);
        state.push_internal_thought(&plan);
        Ok(())
    }
}

/// Drafts tagged practice problems from the latest plan, then tells the user
/// what they will practice.
pub struct DraftPracticeProblems {
    model: Arc<dyn LanguageModel>,
}

#[async_trait]
impl Step<ConversationState> for DraftPracticeProblems {
    async fn run(&self, cancel: &CancellationToken, state: &mut ConversationState) -> Result<(), BoxError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(plan) = state.last_internal_thought() {
            messages.push(plan.clone());
        }
        messages.push(Message::system(DRAFT_PROMPT));

        let draft = self
            .model
            .generate(cancel, &messages, GenerateOptions::with_temperature(0.5))
            .await
            .map_err(TutorError::from)?;
        debug!("Drafted practice problems: {}", draft);
        // Finalize pops this entry; nothing may be pushed after it.
        state.push_internal_thought(&draft);

        let initial_prompt = state
            .first_message_of(Role::Human)
            .map(|m| m.text().to_string())
            .unwrap_or_default();
        let summary = self
            .model
            .generate(
                cancel,
                &[Message::system(summary_prompt(&initial_prompt)), Message::human(draft)],
                GenerateOptions::with_temperature(0.5),
            )
            .await
            .map_err(TutorError::from)?;
        state.add_assistant_message(&summary);
        Ok(())
    }
}

/// Turns each drafted `<practice>` block into a question/answer pair.
pub struct FinalizePracticeProblems {
    model: Arc<dyn LanguageModel>,
    policy: ItemDecodePolicy,
}

#[async_trait]
impl Step<ConversationState> for FinalizePracticeProblems {
    async fn run(&self, cancel: &CancellationToken, state: &mut ConversationState) -> Result<(), BoxError> {
        let draft = state.pop_internal_thought();
        let draft_text = draft.as_ref().map(Message::text).unwrap_or_default();
        let problems = parse_practice_problems(draft_text).map_err(TutorError::from)?;
        info!(count = problems.len(), "Finalizing practice problems");

        for (index, problem) in problems.iter().enumerate() {
            let response = self
                .model
                .generate(
                    cancel,
                    &[Message::system(finalize_prompt(problem))],
                    GenerateOptions::with_temperature(0.25),
                )
                .await
                .map_err(TutorError::from)?;

            match parse_answer_and_question(&response) {
                Ok(finalized) => state.add_practice_problem(finalized),
                Err(PartialDecode { partial, error }) => {
                    warn!(index, error = %error, response = %response, "Practice problem did not decode");
                    match self.policy {
                        ItemDecodePolicy::Abort => return Err(TutorError::Decode(error).into()),
                        ItemDecodePolicy::SkipItem => {}
                        ItemDecodePolicy::RecordPartial => state.add_practice_problem(partial),
                    }
                }
            }
        }
        Ok(())
    }
}

/// Wires the tutoring workflow.
///
/// `chat` handles the conversation, classification, planning and drafting;
/// `finalizer` writes the final question/answer pairs.
pub fn build_tutor_graph(
    chat: Arc<dyn LanguageModel>,
    finalizer: Arc<dyn LanguageModel>,
    policy: ItemDecodePolicy,
) -> Result<CompiledGraph<ConversationState>, GraphError> {
    let mut graph = StateGraph::new();
    graph
        .set_entry_point(ASSISTANT)
        .add_node(ASSISTANT, Assistant { model: chat.clone() })
        .add_conditional_edges(ASSISTANT, IntentRouter { model: chat.clone() })
        .add_node(TUTOR, Tutor { model: chat.clone() })
        .add_edge(TUTOR, DRAFT_PRACTICE_PROBLEMS)
        .add_node(DRAFT_PRACTICE_PROBLEMS, DraftPracticeProblems { model: chat })
        .add_edge(DRAFT_PRACTICE_PROBLEMS, FINALIZE_PRACTICE_PROBLEMS)
        .add_node(
            FINALIZE_PRACTICE_PROBLEMS,
            FinalizePracticeProblems {
                model: finalizer,
                policy,
            },
        )
        .add_edge(FINALIZE_PRACTICE_PROBLEMS, END);
    graph.compile()
}
