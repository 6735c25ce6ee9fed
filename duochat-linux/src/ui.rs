//! Terminal presentation: input commands and transcript lines for session events.

use duochat_core::{ConnectionState, PeerHandle, SessionEvent};

use crate::config::KnownPeer;

pub const EMPTY_INPUT_NOTICE: &str = "Please input some texts";
pub const NOT_CONNECTED_NOTICE: &str = "Connection was lost!";
pub const NO_PAIRED_PEERS: &str = "No devices have been paired";

pub const HELP: &str = "\
/connect <name|address>  connect to a peer
/peers                   list paired peers
/status                  show connection status
/start                   listen for peers
/stop                    disconnect and stop listening
/quit                    exit
anything else is sent to the connected peer";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Empty,
    Connect(String),
    Peers,
    Status,
    Start,
    Stop,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(rest) = line.strip_prefix('/') else {
            if line.is_empty() {
                return Command::Empty;
            }
            return Command::Send(line.to_string());
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match name {
            "connect" if !arg.is_empty() => Command::Connect(arg.to_string()),
            "peers" => Command::Peers,
            "status" => Command::Status,
            "start" => Command::Start,
            "stop" => Command::Stop,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

/// Title line for a connection state.
pub fn status_line(state: ConnectionState, peer: Option<&str>) -> String {
    match state {
        ConnectionState::Connected => format!("Connected to: {}", peer.unwrap_or("unknown")),
        ConnectionState::Connecting => "Connecting...".to_string(),
        ConnectionState::Listening | ConnectionState::Idle => "Not connected".to_string(),
    }
}

pub fn peer_list(peers: &[KnownPeer]) -> Vec<String> {
    if peers.is_empty() {
        return vec![NO_PAIRED_PEERS.to_string()];
    }
    peers
        .iter()
        .map(|p| format!("{}\n{}", p.name, p.address))
        .collect()
}

/// Turns session events into printable lines, remembering who we are talking to.
#[derive(Debug, Default)]
pub struct Transcript {
    peer: Option<PeerHandle>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, event: &SessionEvent) -> Vec<String> {
        match event {
            SessionEvent::StateChanged(state) => {
                if !state.is_connected() {
                    self.peer = None;
                }
                vec![status_line(*state, self.peer_name())]
            }
            SessionEvent::PeerAttached(peer) => {
                self.peer = Some(peer.clone());
                vec![format!("Connected to {}", peer.name())]
            }
            SessionEvent::BytesReceived { .. } => {
                let text = String::from_utf8_lossy(event.payload().unwrap_or_default());
                vec![format!("{}:  {}", self.peer_name().unwrap_or("peer"), text)]
            }
            SessionEvent::BytesSent(bytes) => {
                vec![format!("Me: {}", String::from_utf8_lossy(bytes))]
            }
            SessionEvent::UserMessage(message) => vec![message.clone()],
        }
    }

    fn peer_name(&self) -> Option<&str> {
        self.peer.as_ref().map(PeerHandle::name)
    }
}
