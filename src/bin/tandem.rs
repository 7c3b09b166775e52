use anyhow::Result;
use std::io::Write as _;
use tandem::api::client::ApiClient;
use tandem::config::Config;
use tandem::edit::{ApplyOutcome, Document, SelectionRange};
use tandem::session::{ChatSession, SessionUpdate, TurnStatus};
use tandem::state::conversation::flatten_file_tree;
use tandem::state::view_pool::{CodeView, ViewFactory};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Console rendering of a pooled code view: keeps the latest content so the
/// finished turn can be printed as framed blocks.
struct ConsoleCodeView {
    content: String,
    language: Option<String>,
}

impl CodeView for ConsoleCodeView {
    fn set_content(&mut self, content: &str) {
        self.content = content.to_string();
    }

    fn set_height(&mut self, _height_px: usize) {}

    fn dispose(&mut self) {
        self.content.clear();
    }
}

struct ConsoleViewFactory;

impl ViewFactory for ConsoleViewFactory {
    type View = ConsoleCodeView;

    fn create_view(
        &mut self,
        content: &str,
        language: Option<&str>,
        _height_px: usize,
    ) -> ConsoleCodeView {
        ConsoleCodeView {
            content: content.to_string(),
            language: language.map(ToOwned::to_owned),
        }
    }
}

type ConsoleSession = ChatSession<ConsoleViewFactory>;
type InputLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let client = ApiClient::new(&config)?;
    let mut session = ConsoleSession::new(
        client.clone(),
        ConsoleViewFactory,
        config.model.clone(),
        config.command.clone(),
    );

    println!("tandem console connected to {}", config.server_url);
    println!(
        "'/<cmd>' runs a server command, ':edit <file> <anchor> <head> <instruction>' \
         edits a selection, ':files' lists the tracked files, ':clear' resets, ':quit' exits."
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }
        if input == ":quit" {
            break;
        }
        if input == ":clear" {
            session.clear_conversation();
            println!("conversation cleared");
            continue;
        }
        if input == ":files" {
            print_file_tree(&session);
            continue;
        }
        if let Some(args) = input.strip_prefix(":edit ") {
            run_selection_edit(&mut session, &mut lines, args).await?;
            continue;
        }
        if let Some(command) = input.strip_prefix('/') {
            match client.execute_command(command).await {
                Ok(result) => println!("system: {result}"),
                Err(error) => eprintln!("error: {error}"),
            }
            continue;
        }
        run_chat_turn(&mut session, &input).await?;
    }

    Ok(())
}

async fn run_chat_turn(session: &mut ConsoleSession, prompt: &str) -> Result<()> {
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_updates(update_rx));
    let (cancel, watcher) = interruptible();

    let status = session.send(prompt, Vec::new(), Some(&update_tx), &cancel).await?;

    watcher.abort();
    drop(update_tx);
    let _ = printer.await;

    match status {
        TurnStatus::Completed => print_code_blocks(session),
        TurnStatus::Cancelled => println!("\n[turn cancelled]"),
        TurnStatus::Failed(_) => {}
    }
    println!();
    Ok(())
}

async fn run_selection_edit(
    session: &mut ConsoleSession,
    lines: &mut InputLines,
    args: &str,
) -> Result<()> {
    const USAGE: &str = "usage: :edit <file> <anchor> <head> <instruction>";

    let mut parts = args.splitn(4, ' ');
    let (Some(file), Some(anchor), Some(head), Some(instruction)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        eprintln!("{USAGE}");
        return Ok(());
    };
    let (Ok(anchor), Ok(head)) = (anchor.parse::<usize>(), head.parse::<usize>()) else {
        eprintln!("{USAGE}");
        return Ok(());
    };

    let original = match tokio::fs::read_to_string(file).await {
        Ok(text) => text,
        Err(error) => {
            eprintln!("error: cannot read {file}: {error}");
            return Ok(());
        }
    };
    let mut document = Document::new(original);
    let range = SelectionRange::new(anchor, head);

    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_updates(update_rx));
    let (cancel, watcher) = interruptible();

    let status = session
        .request_selection_edit(file, &document, range, instruction, Some(&update_tx), &cancel)
        .await?;

    watcher.abort();
    drop(update_tx);
    let _ = printer.await;

    if status != TurnStatus::Completed {
        println!("\n[edit abandoned]");
        return Ok(());
    }

    let proposed = session.proposed_text().map(ToOwned::to_owned);
    let Some(proposed) = proposed.filter(|text| !text.is_empty()) else {
        println!("\n[no replacement proposed]");
        session.reject_pending_edit();
        return Ok(());
    };

    println!("\n--- proposed replacement ---\n{proposed}\n---");
    print!("apply? [y/N] ");
    std::io::stdout().flush()?;
    let answer = lines.next_line().await?.unwrap_or_default();

    if answer.trim().eq_ignore_ascii_case("y") {
        match session.accept_pending_edit(&mut document) {
            Ok(ApplyOutcome::Applied) => {
                tokio::fs::write(file, document.get_value()).await?;
                println!("applied to {file}");
            }
            Ok(ApplyOutcome::Skipped) => println!("empty replacement; nothing applied"),
            Err(error) => eprintln!("error: {error}"),
        }
    } else {
        session.reject_pending_edit();
        println!("rejected");
    }
    Ok(())
}

/// Print streamed updates as they arrive; assistant and proposal deltas are
/// written without terminators so the text flows.
async fn print_updates(mut update_rx: mpsc::UnboundedReceiver<SessionUpdate>) {
    while let Some(update) = update_rx.recv().await {
        match update {
            SessionUpdate::AssistantDelta(text) | SessionUpdate::ProposedDelta(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            SessionUpdate::SystemMessage(text) => println!("\nsystem: {text}"),
            SessionUpdate::LogLine(line) => eprintln!("log: {line}"),
            SessionUpdate::UsageUpdated {
                total_tokens,
                total_cost,
            } => eprintln!("usage: {total_tokens} tokens, ${total_cost:.4}"),
            SessionUpdate::FilesUpdated => eprintln!("log: file tree updated"),
        }
    }
}

fn print_file_tree(session: &ConsoleSession) {
    let Some(tree) = session.conversation().file_tree() else {
        println!("no file tree received yet");
        return;
    };
    for (name, path) in flatten_file_tree(tree) {
        println!("{name}  ({path})");
    }
}

fn print_code_blocks(session: &ConsoleSession) {
    for segment in session.segments() {
        if !segment.is_code() {
            continue;
        }
        let Some(view) = session.views().get(segment.id) else {
            continue;
        };
        let language = view.language.as_deref().unwrap_or("code");
        println!("\n--- {language} ---\n{}\n---", view.content);
    }
}

/// A fresh per-turn cancellation token wired to Ctrl-C.
fn interruptible() -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    (cancel, watcher)
}
