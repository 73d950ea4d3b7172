//! Client transport session driver.
//!
//! Owns the [`TransportMachine`], performs its actions against the push and
//! pull transports, and turns everything the user should see into
//! [`Output`]s.

use std::{collections::VecDeque, future, sync::Arc, time::Duration};

use bytes::Bytes;
use relay_core::{
    Message, Notice,
    protocol::{ClientFrame, InboundFrame, RawHistory},
};
use tokio::{sync::mpsc, time::Interval};
use url::Url;
use uuid::Uuid;

use crate::{
    command::{Command, HELP, guess_mime},
    endpoint::Endpoint,
    error::TransportError,
    feed::Feed,
    state::{Action, TransportEvent, TransportMachine, TransportState},
    transport::{PullApi, PushConnector, PushLink},
};

/// Something to show the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// A chat message. `own` marks the local echo of something we sent.
    Chat { message: Message, own: bool },
    Notice(Notice),
    Presence(usize),
    Info(String),
    Error(String),
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Initial nickname.
    pub nick: String,
    /// Pull transport poll interval.
    pub poll_interval: Duration,
    /// Whether plain lines are sent as chat messages.
    pub autosay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nick: "anon".into(),
            poll_interval: Duration::from_millis(2000),
            autosay: true,
        }
    }
}

/// One chat client's connection to a relay.
pub struct ClientSession {
    machine: TransportMachine,
    feed: Feed,
    nick: String,
    autosay: bool,
    poll_interval: Duration,
    connector: Arc<dyn PushConnector>,
    pull: Arc<dyn PullApi>,
    link: Option<Box<dyn PushLink>>,
    catch_up: Option<RawHistory>,
    poller: Option<Interval>,
    poll_base: Option<Url>,
    outputs: mpsc::UnboundedSender<Output>,
}

impl ClientSession {
    /// Create a disconnected session with a fresh origin id.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn PushConnector>,
        pull: Arc<dyn PullApi>,
        outputs: mpsc::UnboundedSender<Output>,
    ) -> Self {
        Self {
            machine: TransportMachine::new(),
            feed: Feed::new(format!("user_{}", Uuid::new_v4().simple())),
            nick: config.nick,
            autosay: config.autosay,
            poll_interval: config.poll_interval,
            connector,
            pull,
            link: None,
            catch_up: None,
            poller: None,
            poll_base: None,
            outputs,
        }
    }

    /// Origin id attached to every outgoing message.
    #[must_use]
    pub fn origin_id(&self) -> &str {
        self.feed.origin_id()
    }

    /// Current transport state.
    #[must_use]
    pub const fn state(&self) -> TransportState {
        self.machine.state()
    }

    /// Current nickname.
    #[must_use]
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Drive the session until `lines` closes.
    pub async fn run(mut self, mut lines: mpsc::Receiver<String>) {
        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => self.handle_line(&line).await,
                    None => break,
                },
                frame = next_frame(&mut self.link) => self.on_frame(frame).await,
                () = next_tick(&mut self.poller) => self.poll_once().await,
            }
        }
        self.apply(TransportEvent::Disconnect).await;
    }

    /// Parse and execute one input line.
    pub async fn handle_line(&mut self, line: &str) {
        match Command::parse(line, self.autosay) {
            Ok(Some(command)) => self.execute(command).await,
            Ok(None) => {}
            Err(e) => self.emit(Output::Error(e.to_string())),
        }
    }

    /// Execute a command.
    pub async fn execute(&mut self, command: Command) {
        match command {
            Command::Join(target) => self.connect(Endpoint::resolve(&target)).await,
            Command::Connect(address) => self.connect(Endpoint::parse(&address)).await,
            Command::Disconnect => {
                if self.state() == TransportState::Disconnected {
                    self.info("not connected");
                }
                self.apply(TransportEvent::Disconnect).await;
            }
            Command::Check => {
                let text = match self.machine.endpoint() {
                    Some(endpoint) if self.state() != TransportState::Disconnected => {
                        format!("{} via {endpoint}", self.state())
                    }
                    _ => "no active connection".to_owned(),
                };
                self.info(text);
            }
            Command::Nick(None) => self.info(format!("nickname: {}", self.nick)),
            Command::Nick(Some(nick)) => {
                self.nick = nick;
                self.info(format!("nickname set to {}", self.nick));
            }
            Command::Say(text) => self.say(&text).await,
            Command::Presence => self.presence().await,
            Command::Uid => self.info(format!("origin id: {}", self.origin_id())),
            Command::AutoSay(on) => {
                self.autosay = on;
                self.info(format!("autosay {}", if on { "on" } else { "off" }));
            }
            Command::Upload { path, mime } => {
                let mime = mime.unwrap_or_else(|| guess_mime(&path).to_owned());
                match tokio::fs::read(&path).await {
                    Ok(data) => self.upload(Bytes::from(data), &mime).await,
                    Err(e) => self.emit(Output::Error(format!(
                        "cannot read {}: {e}",
                        path.display()
                    ))),
                }
            }
            Command::Echo(text) => self.info(text),
            Command::Help => self.info(HELP),
        }
    }

    /// Connect to an already resolved endpoint, tearing down any current
    /// connection first.
    pub async fn open(&mut self, endpoint: Endpoint) {
        self.apply(TransportEvent::Connect(endpoint)).await;
    }

    async fn connect(&mut self, endpoint: Result<Endpoint, crate::endpoint::AddressError>) {
        match endpoint {
            Ok(endpoint) => self.open(endpoint).await,
            Err(e) => self.emit(Output::Error(e.to_string())),
        }
    }

    /// Send a chat message on the current transport and echo it locally.
    pub async fn say(&mut self, text: &str) {
        let message = match Message::new(&self.nick, text, Some(self.origin_id().to_owned())) {
            Ok(message) => message,
            Err(e) => return self.emit(Output::Error(format!("not sent: {e}"))),
        };

        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => return self.emit(Output::Error(format!("not sent: {e}"))),
        };
        let sent = match self.state() {
            TransportState::ConnectedPush => match self.link.as_mut() {
                Some(link) => link.send(json).await,
                None => Err(TransportError::Closed),
            },
            TransportState::PollingPull => match &self.poll_base {
                Some(base) => self.pull.publish(base, &message).await,
                None => Err(TransportError::Closed),
            },
            TransportState::Disconnected | TransportState::ConnectingPush => {
                return self.emit(Output::Error("not connected".into()));
            }
        };

        match sent {
            Ok(()) => self.emit(Output::Chat { message, own: true }),
            Err(e) => {
                self.emit(Output::Error(format!("not sent: {e}")));
                if self.state() == TransportState::ConnectedPush {
                    self.apply(TransportEvent::TransportFailed(e.to_string())).await;
                }
            }
        }
    }

    async fn presence(&mut self) {
        match self.state() {
            TransportState::ConnectedPush => {
                // Answered by a presence frame
                let sent = match self.link.as_mut() {
                    Some(link) => link.send(ClientFrame::presence_query()).await,
                    None => Err(TransportError::Closed),
                };
                if let Err(e) = sent {
                    self.apply(TransportEvent::TransportFailed(e.to_string())).await;
                }
            }
            TransportState::PollingPull => {
                let count = match &self.poll_base {
                    Some(base) => self.pull.presence(base).await,
                    None => Err(TransportError::Closed),
                };
                match count {
                    Ok(count) => self.emit(Output::Presence(count)),
                    Err(e) => self.emit(Output::Error(format!("presence failed: {e}"))),
                }
            }
            TransportState::Disconnected | TransportState::ConnectingPush => {
                self.emit(Output::Error("not connected".into()));
            }
        }
    }

    async fn upload(&mut self, data: Bytes, mime: &str) {
        let Some(base) = self
            .machine
            .endpoint()
            .filter(|_| self.state() != TransportState::Disconnected)
            .map(|endpoint| endpoint.pull_base().clone())
        else {
            return self.emit(Output::Error("not connected".into()));
        };
        match self.pull.upload(&base, data, mime).await {
            Ok(locator) => self.say(locator.as_str()).await,
            Err(e) => self.emit(Output::Error(format!("upload failed: {e}"))),
        }
    }

    /// Fetch history once and show what is new.
    pub async fn poll_once(&mut self) {
        let Some(base) = self.poll_base.clone() else {
            return;
        };
        match self.pull.history(&base, self.feed.origin_id()).await {
            Ok(history) => {
                for output in self.feed.apply_history(history) {
                    self.emit(output);
                }
            }
            Err(e) => {
                tracing::warn!(%base, "poll failed: {e}");
                self.emit(Output::Error(format!("poll failed: {e}")));
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<InboundFrame, TransportError>>) {
        match frame {
            None => self.apply(TransportEvent::RemoteClosed).await,
            Some(Err(e)) => self.apply(TransportEvent::TransportFailed(e.to_string())).await,
            Some(Ok(frame)) => match frame {
                InboundFrame::Chat { message, index } => {
                    if let Some(output) = self.feed.apply_chat(message, index) {
                        self.emit(output);
                    }
                }
                InboundFrame::Notice(notice) => {
                    let output = self.feed.apply_notice(notice);
                    self.emit(output);
                }
                InboundFrame::Presence(count) => self.emit(Output::Presence(count)),
                InboundFrame::History(history) => {
                    for output in self.feed.apply_history(history) {
                        self.emit(output);
                    }
                }
                InboundFrame::Error(message) => self.emit(Output::Error(message)),
            },
        }
    }

    /// Feed an event to the machine and perform the resulting actions,
    /// including any events those actions produce.
    async fn apply(&mut self, event: TransportEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let actions = match self.machine.handle(event) {
                Ok(actions) => actions,
                Err(e) => {
                    tracing::debug!("ignored: {e}");
                    continue;
                }
            };
            for action in actions {
                if let Some(next) = self.perform(action).await {
                    pending.push_back(next);
                }
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Option<TransportEvent> {
        match action {
            Action::OpenPush(url) => {
                self.info(format!("connecting to {url}"));
                match self.connector.connect(&url, self.feed.origin_id()).await {
                    Ok((link, history)) => {
                        self.link = Some(link);
                        self.catch_up = Some(history);
                        return Some(TransportEvent::HandshakeSucceeded);
                    }
                    Err(e) => {
                        tracing::info!(%url, "push handshake failed: {e}");
                        return Some(TransportEvent::TransportFailed(e.to_string()));
                    }
                }
            }
            Action::ClosePush => {
                if let Some(mut link) = self.link.take() {
                    link.close().await;
                }
                self.catch_up = None;
            }
            Action::CatchUp => {
                if let Some(history) = self.catch_up.take() {
                    for output in self.feed.apply_history(history) {
                        self.emit(output);
                    }
                }
            }
            Action::StartPolling(base) => {
                self.info(format!(
                    "polling {base} every {}ms",
                    self.poll_interval.as_millis()
                ));
                let mut poller = tokio::time::interval(self.poll_interval);
                poller.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                self.poller = Some(poller);
                self.poll_base = Some(base);
            }
            Action::StopPolling => {
                self.poller = None;
                self.poll_base = None;
                self.info("stopped polling");
            }
            Action::Notify(text) => self.info(text),
        }
        None
    }

    fn info(&self, text: impl Into<String>) {
        self.emit(Output::Info(text.into()));
    }

    fn emit(&self, output: Output) {
        // Receiver gone means the front end is shutting down
        let _ = self.outputs.send(output);
    }
}

async fn next_frame(
    link: &mut Option<Box<dyn PushLink>>,
) -> Option<Result<InboundFrame, TransportError>> {
    match link {
        Some(link) => link.recv().await,
        None => future::pending().await,
    }
}

async fn next_tick(poller: &mut Option<Interval>) {
    match poller {
        Some(poller) => {
            poller.tick().await;
        }
        None => future::pending().await,
    }
}
