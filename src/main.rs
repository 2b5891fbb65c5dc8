use std::collections::VecDeque;
use std::io::Write;

use clap::Parser;
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use streamchat::cli::{apply_overrides, Args};
use streamchat::config::ChatConfig;
use streamchat::transport::TransportBuilder;
use streamchat::{ChatController, ChatError, DisplayMessage, FragmentOutcome, InboundFragment};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = apply_overrides(ChatConfig::load(&args.config)?, &args);
    config.validate()?;

    let (transport, handle, mut inbound) = TransportBuilder::from_config(config.transport()).build();
    let transport_task = tokio::spawn(transport.run());

    let mut controller = ChatController::new(handle, config.chat_options());
    let mut status = controller.status_watcher();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printer = Printer::default();
    // Lines typed while the connection is not open wait here.
    let mut queued: VecDeque<String> = VecDeque::new();
    let mut stdin_done = false;

    eprintln!(
        "{} {}",
        "[streamchat]".bright_cyan(),
        format!("connecting to {}", config.endpoint).dimmed()
    );

    loop {
        tokio::select! {
            line = lines.next_line(), if !stdin_done => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        queued.push_back(line);
                        flush_queue(&mut controller, &mut queued);
                    }
                    None => stdin_done = true,
                }
            }

            fragment = inbound.recv() => {
                let Some(fragment) = fragment else { break };
                let outcome = controller.apply_fragment(&fragment);
                printer.fragment(&fragment, outcome, controller.messages());
            }

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *status.borrow_and_update();
                printer.break_line();
                eprintln!("{} {}", "[streamchat]".bright_cyan(), format!("connection {}", state).dimmed());
                flush_queue(&mut controller, &mut queued);
            }
        }

        if stdin_done && queued.is_empty() && all_replies_complete(controller.messages()) {
            break;
        }
    }

    drop(controller);
    drop(inbound);
    transport_task.await??;
    Ok(())
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Submit queued lines in order while the connection is open.
fn flush_queue(controller: &mut ChatController, queued: &mut VecDeque<String>) {
    while controller.can_submit() {
        let Some(line) = queued.pop_front() else { return };
        if let Err(e) = submit_line(controller, line) {
            eprintln!("{} {}", "[streamchat]".bright_red(), e);
        }
    }
}

fn submit_line(controller: &mut ChatController, line: String) -> Result<(), ChatError> {
    controller.set_input(line)?;
    controller.submit_draft()?;
    Ok(())
}

fn all_replies_complete(thread: &[DisplayMessage]) -> bool {
    thread.iter().all(|m| m.is_complete)
}

/// Streams assistant text to stdout as fragments arrive.
#[derive(Default)]
struct Printer {
    /// Id of the message whose text is currently being printed.
    streaming: Option<String>,
}

impl Printer {
    fn fragment(&mut self, fragment: &InboundFragment, outcome: FragmentOutcome, thread: &[DisplayMessage]) {
        let index = match outcome {
            FragmentOutcome::Extended { index } | FragmentOutcome::Inserted { index } => index,
            FragmentOutcome::Dropped => return,
        };
        let message = &thread[index];

        if self.streaming.as_deref() != Some(message.message_id.as_str()) {
            self.break_line();
            print!("{} ", format!("{}>", message.sender).bright_green().bold());
            self.streaming = Some(message.message_id.clone());
        }
        print!("{}", fragment.text());
        if message.is_complete {
            println!();
            self.streaming = None;
        }
        let _ = std::io::stdout().flush();
    }

    /// End a partially printed reply so other output starts on a fresh line.
    fn break_line(&mut self) {
        if self.streaming.take().is_some() {
            println!();
        }
    }
}
