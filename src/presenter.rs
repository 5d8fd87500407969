//! Terminal rendering of search results and the interactive command loop.

use std::io::{self, Write};

use chrono::{Local, NaiveDate};
use colored::Colorize;
use log::warn;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::controller::{SearchController, SearchState};
use crate::link::DeepLink;
use crate::search::{MatchResult, SearchEvent, SearchQuery};
use crate::source::MessageSource;

const WRAP_WIDTH: usize = 100;

const HELP: &str = "\
Commands:
  toi [DD-MM-YYYY]   find the newspaper edition (default: today)
  mag <keywords>     find magazines about the keywords
  open N             open result N in Telegram
  copy N             print result N's link and reference
  list               show the current results
  login              log in to Telegram again
  help               show this help
  quit               exit";

/// Opens deep links outside the program.
pub trait LinkOpener {
    fn open(&self, link: &DeepLink) -> io::Result<()>;
}

/// Hands links to the platform's default handler.
pub struct SystemOpener;

impl LinkOpener for SystemOpener {
    fn open(&self, link: &DeepLink) -> io::Result<()> {
        let url = link.to_string();
        #[cfg(target_os = "macos")]
        let mut command = {
            let mut c = std::process::Command::new("open");
            c.arg(&url);
            c
        };
        #[cfg(target_os = "windows")]
        let mut command = {
            let mut c = std::process::Command::new("cmd");
            c.args(["/C", "start", "", &url]);
            c
        };
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let mut command = {
            let mut c = std::process::Command::new("xdg-open");
            c.arg(&url);
            c
        };
        command.spawn().map(|_| ())
    }
}

/// Results of the current search, in arrival order.
#[derive(Debug, Default)]
pub struct ResultList {
    entries: Vec<MatchResult>,
}

impl ResultList {
    pub fn push(&mut self, result: MatchResult) -> usize {
        self.entries.push(result);
        self.entries.len()
    }

    /// Entry by its 1-based display number.
    pub fn get(&self, number: usize) -> Option<&MatchResult> {
        number.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchResult> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Newspaper(Option<NaiveDate>),
    Magazine(String),
    Open(usize),
    Copy(usize),
    List,
    Login,
    Help,
    Quit,
    Nothing,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_lowercase().as_str() {
        "" => Ok(Command::Nothing),
        "toi" | "newspaper" => {
            if rest.is_empty() {
                Ok(Command::Newspaper(None))
            } else {
                NaiveDate::parse_from_str(rest, "%d-%m-%Y")
                    .map(|d| Command::Newspaper(Some(d)))
                    .map_err(|_| "Date must be in DD-MM-YYYY format".to_string())
            }
        }
        "mag" | "magazine" => {
            if rest.is_empty() {
                Err("Please enter keywords for magazine search.".to_string())
            } else {
                Ok(Command::Magazine(rest.to_string()))
            }
        }
        "open" | "copy" => {
            let number = rest
                .parse::<usize>()
                .map_err(|_| format!("Usage: {} N", word))?;
            if word.eq_ignore_ascii_case("open") {
                Ok(Command::Open(number))
            } else {
                Ok(Command::Copy(number))
            }
        }
        "list" | "ls" => Ok(Command::List),
        "login" => Ok(Command::Login),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("Unknown command '{}'. Type 'help'.", other)),
    }
}

/// What the caller should do after an event was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Continue,
    Finished,
    /// Finished because the session expired.
    NeedsLogin,
}

/// Renders search progress and results, and acts on selections.
pub struct Presenter<W: Write, O: LinkOpener> {
    out: W,
    opener: O,
    results: ResultList,
    state: SearchState,
}

impl<W: Write, O: LinkOpener> Presenter<W, O> {
    pub fn new(out: W, opener: O) -> Self {
        Self {
            out,
            opener,
            results: ResultList::default(),
            state: SearchState::Idle,
        }
    }

    pub fn results(&self) -> &ResultList {
        &self.results
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Forget the previous search's results.
    pub fn reset(&mut self) {
        self.results.clear();
        self.state = SearchState::Idle;
    }

    pub fn handle_event(&mut self, event: SearchEvent) -> io::Result<EventOutcome> {
        self.state = self.state.advance(&event);
        match event {
            SearchEvent::Started { mode } => {
                writeln!(self.out, "Searching for {}...", mode)?;
                Ok(EventOutcome::Continue)
            }
            SearchEvent::Scanning {
                channel,
                index,
                total,
            } => {
                writeln!(self.out, "{}", format!("[{}/{}] {}", index + 1, total, channel).dimmed())?;
                Ok(EventOutcome::Continue)
            }
            SearchEvent::Match(result) => {
                let number = self.results.len() + 1;
                render_entry(&mut self.out, number, &result)?;
                self.results.push(result);
                Ok(EventOutcome::Continue)
            }
            SearchEvent::Completed(summary) => {
                writeln!(
                    self.out,
                    "{} {} match(es) in {} message(s) from {} channel(s).",
                    "✓ Search completed:".green(),
                    summary.matches,
                    summary.scanned,
                    summary.channels
                )?;
                Ok(EventOutcome::Finished)
            }
            SearchEvent::Aborted(error) => {
                writeln!(self.out, "{} {}", "✗ Search failed:".red(), error)?;
                if error.requires_login() {
                    writeln!(self.out, "Your Telegram session has expired. Type 'login' to sign in again.")?;
                    Ok(EventOutcome::NeedsLogin)
                } else {
                    writeln!(self.out, "You can retry by starting the search again.")?;
                    Ok(EventOutcome::Finished)
                }
            }
        }
    }

    pub fn open(&mut self, number: usize) -> io::Result<()> {
        let Some(result) = self.results.get(number) else {
            return writeln!(self.out, "No result #{}.", number);
        };
        match self.opener.open(&result.link) {
            Ok(()) => writeln!(self.out, "✓ Opening {}", result.link),
            Err(e) => {
                warn!("Failed to open {}: {}", result.link, e);
                writeln!(self.out, "✗ Failed to open link: {}", e)
            }
        }
    }

    pub fn copy(&mut self, number: usize) -> io::Result<()> {
        match self.results.get(number) {
            Some(result) => writeln!(self.out, "{}\n{}", result.link, result.reference()),
            None => writeln!(self.out, "No result #{}.", number),
        }
    }

    pub fn list(&mut self) -> io::Result<()> {
        if self.results.is_empty() {
            return writeln!(self.out, "No results yet.");
        }
        for (i, result) in self.results.iter().enumerate() {
            render_entry(&mut self.out, i + 1, result)?;
        }
        Ok(())
    }

    pub fn say(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)
    }
}

/// One numbered result: wrapped label, then its link.
pub fn render_entry<W: Write>(out: &mut W, number: usize, result: &MatchResult) -> io::Result<()> {
    let head = format!("{:>3}. ", number);
    let indent = " ".repeat(head.len());
    let options = textwrap::Options::new(WRAP_WIDTH)
        .initial_indent(&head)
        .subsequent_indent(&indent);
    writeln!(out, "{}", textwrap::fill(&result.label, options))?;
    writeln!(out, "{}{}", indent, result.link.to_string().blue().underline())
}

async fn next_event(events: &mut Option<UnboundedReceiver<SearchEvent>>) -> Option<SearchEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drive the terminal session until the user quits.
///
/// Searches run on a background task; results print as they arrive while the
/// prompt keeps accepting commands. With `exit_when_done`, returns as soon as
/// the first search ends.
pub async fn run_interactive<S, W, O>(
    controller: &SearchController<S>,
    presenter: &mut Presenter<W, O>,
    initial: Option<SearchQuery>,
    exit_when_done: bool,
) -> anyhow::Result<()>
where
    S: MessageSource + 'static,
    W: Write,
    O: LinkOpener,
{
    let input = BufReader::new(tokio::io::stdin());
    run_session(controller, presenter, input, initial, exit_when_done).await
}

/// `run_interactive` over any line source.
///
/// End of input stops reading commands but not the running search; the
/// session ends once no search is in flight.
pub async fn run_session<S, W, O, R>(
    controller: &SearchController<S>,
    presenter: &mut Presenter<W, O>,
    input: R,
    initial: Option<SearchQuery>,
    exit_when_done: bool,
) -> anyhow::Result<()>
where
    S: MessageSource + 'static,
    W: Write,
    O: LinkOpener,
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut events: Option<UnboundedReceiver<SearchEvent>> = None;
    let mut input_open = true;

    if let Some(query) = initial {
        match controller.start(query) {
            Ok(handle) => {
                presenter.reset();
                events = Some(handle.events);
            }
            Err(e) if exit_when_done => return Err(e.into()),
            Err(e) => presenter.say(&format!("✗ {}", e))?,
        }
    } else {
        presenter.say(HELP)?;
    }

    loop {
        if !input_open && events.is_none() {
            break;
        }
        tokio::select! {
            event = next_event(&mut events) => {
                let Some(event) = event else {
                    events = None;
                    continue;
                };
                match presenter.handle_event(event)? {
                    EventOutcome::Continue => {}
                    EventOutcome::Finished | EventOutcome::NeedsLogin => {
                        events = None;
                        if exit_when_done {
                            return Ok(());
                        }
                    }
                }
            }
            line = lines.next_line(), if input_open => {
                let Some(line) = line? else {
                    input_open = false;
                    continue;
                };
                let command = match parse_command(&line) {
                    Ok(command) => command,
                    Err(message) => {
                        presenter.say(&message)?;
                        continue;
                    }
                };
                match command {
                    Command::Nothing => {}
                    Command::Quit => break,
                    Command::Help => presenter.say(HELP)?,
                    Command::List => presenter.list()?,
                    Command::Open(n) => presenter.open(n)?,
                    Command::Copy(n) => presenter.copy(n)?,
                    Command::Login => {
                        if controller.is_running() {
                            presenter.say("Wait for the current search to finish first.")?;
                        } else if let Err(e) = controller.source().reauthenticate().await {
                            presenter.say(&format!("✗ Login failed: {}", e))?;
                        } else {
                            presenter.say("✓ Logged in.")?;
                        }
                    }
                    Command::Newspaper(date) => {
                        let date = date.unwrap_or_else(|| Local::now().date_naive());
                        start(controller, presenter, SearchQuery::newspaper(date), &mut events)?;
                    }
                    Command::Magazine(keywords) => {
                        start(controller, presenter, SearchQuery::magazine(keywords), &mut events)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn start<S, W, O>(
    controller: &SearchController<S>,
    presenter: &mut Presenter<W, O>,
    query: SearchQuery,
    events: &mut Option<UnboundedReceiver<SearchEvent>>,
) -> io::Result<()>
where
    S: MessageSource + 'static,
    W: Write,
    O: LinkOpener,
{
    match controller.start(query) {
        Ok(handle) => {
            presenter.reset();
            *events = Some(handle.events);
            Ok(())
        }
        Err(e) => presenter.say(&format!("✗ {}", e)),
    }
}
