// Terminal front end: streams model text to stdout, tool activity to stderr,
// and asks for approvals on stdin.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tether_core::event::{PresentationSink, SinkError};
use tether_protocol::{ApprovalRequestEvent, EventMsg, ReviewDecision, ToolOutcome};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

pub type StdinLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

pub fn stdin_lines() -> StdinLines {
    Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

pub struct TerminalSink {
    input: StdinLines,
}

impl TerminalSink {
    pub fn new(input: StdinLines) -> Self {
        Self { input }
    }
}

#[async_trait]
impl PresentationSink for TerminalSink {
    async fn emit(&self, event: EventMsg) {
        match event {
            EventMsg::AgentMessageDelta(delta) => {
                print!("{}", delta.delta);
                let _ = std::io::stdout().flush();
            }
            EventMsg::ToolCallBegin(begin) => {
                eprintln!("\n> {} {}", begin.tool_name, begin.arguments);
            }
            EventMsg::ToolCallEnd(end) => match &end.result.outcome {
                ToolOutcome::Success(output) => {
                    eprintln!("< {} ok ({} bytes)", end.result.tool_name, output.content.len());
                }
                ToolOutcome::Failure(failure) => {
                    eprintln!(
                        "< {} {}: {}",
                        end.result.tool_name,
                        failure.kind.as_str(),
                        failure.message
                    );
                }
            },
            EventMsg::ApprovalRetracted(retracted) => {
                eprintln!("(approval for {} withdrawn)", retracted.call_id);
            }
            EventMsg::TurnCompleted(completed) => {
                println!();
                if let Some(reason) = completed.terminated {
                    eprintln!("turn ended: {reason}");
                }
            }
            EventMsg::TurnStarted(_)
            | EventMsg::StateChanged(_)
            | EventMsg::ApprovalRequest(_) => {}
        }
    }

    async fn prompt_approval(
        &self,
        request: ApprovalRequestEvent,
    ) -> Result<ReviewDecision, SinkError> {
        eprintln!("\n{} wants to run with:", request.tool_name);
        for line in request.rendered.lines() {
            eprintln!("    {line}");
        }
        eprint!("Allow? [y]es / [a]lways / [n]o / [d]eny always: ");
        let _ = std::io::stderr().flush();

        let line = self.input.lock().await.next_line().await;
        match line {
            Ok(Some(answer)) => Ok(parse_decision(&answer)),
            Ok(None) | Err(_) => Err(SinkError::Closed),
        }
    }

    async fn retract_approval(&self, call_id: &str) {
        eprintln!("\n(approval for {call_id} withdrawn)");
    }
}

/// Anything that is not an explicit approval denies.
fn parse_decision(answer: &str) -> ReviewDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ReviewDecision::Approved,
        "a" | "always" => ReviewDecision::ApprovedForSession,
        "d" | "deny" => ReviewDecision::DeniedForSession,
        _ => ReviewDecision::Denied,
    }
}
