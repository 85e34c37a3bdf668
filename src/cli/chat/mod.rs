pub mod conversation_state;
pub mod parser;
pub mod prompt;
pub mod session;
pub mod tutor;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use color_print::cformat;
use conversation_state::{ConversationState, Role};
use eyre::Result;
use prompt::generate_prompt;
use session::{ChatResponse, SessionError, SessionStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TutorConfig;
use crate::llm_client::{LanguageModel, OpenAiCompatibleClient};

const WELCOME_TEXT: &str = "
Hi, I'm your tutor. Ask me anything, or ask for practice.

Things to try
• Can you quiz me on derivatives?
• Give me some stoichiometry practice problems.
• Explain what an eigenvector is.

/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
Tutor Chat CLI

/clear        Clear the conversation history
/new          Start a new session
/history      Show the conversation so far
/help         Show this help dialogue
/quit         Quit the application

Ctrl-C while the tutor is thinking cancels the current request.
";

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<String>,
    interactive: bool,
    json: bool,
    config: TutorConfig,
    store: Option<SessionStore>,
    session_id: String,
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        interactive: bool,
        json: bool,
        config: TutorConfig,
    ) -> Self {
        Self {
            output,
            input,
            interactive,
            json,
            config,
            store: None,
            session_id: String::new(),
        }
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        let store = match self.build_store() {
            Ok(store) => store,
            Err(e) => {
                writeln!(self.output, "Failed to initialize the tutor: {}", e)?;
                return Ok(ExitCode::FAILURE);
            }
        };
        self.session_id = store.new_session();
        self.store = Some(store);

        // Handle non-interactive mode (single query)
        if let Some(input) = self.input.take() {
            return match self.process_chat_input(&input).await {
                Ok(()) => Ok(ExitCode::SUCCESS),
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    Ok(ExitCode::FAILURE)
                }
            };
        }

        if self.interactive {
            writeln!(self.output, "{}", WELCOME_TEXT)?;
            self.run_interactive().await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    fn build_store(&self) -> Result<SessionStore> {
        let chat: Arc<dyn LanguageModel> = Arc::new(OpenAiCompatibleClient::new(
            &self.config.provider,
            &self.config.chat_model,
        )?);
        let finalizer: Arc<dyn LanguageModel> = Arc::new(OpenAiCompatibleClient::new(
            &self.config.provider,
            &self.config.finalize_model,
        )?);
        info!(
            chat_model = chat.model_id(),
            finalize_model = finalizer.model_id(),
            "Using models"
        );
        let graph = tutor::build_tutor_graph(chat, finalizer, self.config.item_policy)?
            .with_step_limit(self.config.step_limit);
        info!(
            entry = graph.entry_point(),
            step_limit = graph.step_limit(),
            policy = ?self.config.item_policy,
            "Tutor workflow ready"
        );
        Ok(SessionStore::new(graph))
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = prompt::rl()?;
        let history = prompt::history_path();
        if let Some(path) = &history {
            // A missing history file is normal on first run.
            let _ = rl.load_history(path);
        }

        loop {
            let prompt_text = generate_prompt(None);
            let readline = rl.readline(&prompt_text);

            match readline {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    rl.add_history_entry(line.as_str());

                    if line.trim() == "/quit" {
                        break;
                    }

                    if let Err(e) = self.handle_input(&line).await {
                        writeln!(self.output, "Error: {}", e)?;
                    }
                }
                Err(rustyline::error::ReadlineError::Interrupted | rustyline::error::ReadlineError::Eof) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        if let Some(path) = &history {
            if let Err(e) = rl.save_history(path) {
                warn!("Could not save history to {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    async fn handle_input(&mut self, input: &str) -> Result<()> {
        match input.trim() {
            "/help" => {
                writeln!(self.output, "{}", HELP_TEXT)?;
            }
            "/history" => self.print_history().await?,
            "/clear" | "/new" => {
                let store = self.store()?;
                store.reset(&self.session_id);
                self.session_id = store.new_session();
                writeln!(self.output, "Started a new conversation.")?;
            }
            _ => self.process_chat_input(input).await?,
        }

        Ok(())
    }

    async fn print_history(&mut self) -> Result<()> {
        let state = self
            .store()?
            .snapshot(&self.session_id)
            .await
            .unwrap_or_else(ConversationState::new);
        debug!(
            thoughts = state.internal_thoughts().len(),
            pending_problems = state.practice_problems().len(),
            "Session snapshot"
        );
        for message in state.get_messages() {
            let who = match message.role {
                Role::Human => cformat!("<green>you</green>"),
                Role::Ai => cformat!("<cyan>tutor</cyan>"),
                Role::System => cformat!("<dim>system</dim>"),
            };
            writeln!(self.output, "{}: {}", who, message.text())?;
        }
        Ok(())
    }

    fn store(&self) -> Result<&SessionStore> {
        self.store
            .as_ref()
            .ok_or_else(|| eyre::eyre!("Tutor not initialized"))
    }

    async fn process_chat_input(&mut self, input: &str) -> Result<()> {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let result = self.store()?.run_turn(&self.session_id, input, &cancel).await;
        watcher.abort();

        match result {
            Ok(response) => self.render(&response),
            Err(e) => {
                match &e {
                    SessionError::Workflow(graph_error) => match graph_error.node_source() {
                        Some(cause) => error!(cause = %cause, "Turn failed: {}", e),
                        None => error!("Turn failed: {}", e),
                    },
                    SessionError::EmptyMessage => warn!("Ignoring empty message"),
                }
                Err(e.into())
            }
        }
    }

    fn render(&mut self, response: &ChatResponse) -> Result<()> {
        if self.json {
            writeln!(self.output, "{}", serde_json::to_string_pretty(response)?)?;
            return Ok(());
        }

        writeln!(self.output, "{}", response.content)?;
        for (index, problem) in response.problem_solutions.iter().enumerate() {
            writeln!(self.output)?;
            writeln!(
                self.output,
                "{}",
                cformat!("<bold>Problem {}:</bold> {}", index + 1, problem.question)
            )?;
            if problem.is_complete() {
                writeln!(self.output, "{}", cformat!("<dim>Answer:</dim> {}", problem.answer))?;
            } else {
                writeln!(self.output, "{}", cformat!("<yellow>(incomplete)</yellow> {}", problem.answer))?;
            }
        }
        writeln!(
            self.output,
            "{}",
            cformat!("<dim>({} ms)</dim>", response.elapsed_time_ms)
        )?;
        Ok(())
    }
}
