use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Control-surface clients check this on connect.
pub const PROTOCOL_VERSION: u32 = 1;

// ── display payload ───────────────────────────────────────────────────────────

/// How the matrix presents content: one horizontally scrolled line or a
/// sequence of lines scrolled vertically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Flat,
    Lines,
}

/// One playout round worth of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisplayPayload {
    FlatText(String),
    LineSet(Vec<String>),
}

impl DisplayPayload {
    pub fn empty(mode: OutputMode) -> Self {
        match mode {
            OutputMode::Flat => DisplayPayload::FlatText(String::new()),
            OutputMode::Lines => DisplayPayload::LineSet(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DisplayPayload::FlatText(text) => text.is_empty(),
            DisplayPayload::LineSet(lines) => lines.is_empty(),
        }
    }

    pub fn mode(&self) -> OutputMode {
        match self {
            DisplayPayload::FlatText(_) => OutputMode::Flat,
            DisplayPayload::LineSet(_) => OutputMode::Lines,
        }
    }
}

impl fmt::Display for DisplayPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayPayload::FlatText(text) => write!(f, "{}", text),
            DisplayPayload::LineSet(lines) => write!(f, "{}", lines.join(" | ")),
        }
    }
}

// ── channels ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// A zone of the media-control service.
    MediaService,
    /// A player behind a polled now-playing webserver.
    Webserver,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    Playing,
    #[default]
    Stopped,
}

/// One controllable audio source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    pub kind: ChannelKind,
    pub display_name: String,
    #[serde(default)]
    pub play_state: PlayState,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub repeat: bool,
}

impl Channel {
    pub fn new(kind: ChannelKind, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            display_name: display_name.into(),
            play_state: PlayState::Stopped,
            shuffle: false,
            repeat: false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.play_state == PlayState::Playing
    }
}

// ── control surface ───────────────────────────────────────────────────────────

/// Discrete gestures of the five-way control surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Up,
    Down,
    Left,
    Right,
    Confirm,
}

impl FromStr for Gesture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" | "top" => Ok(Gesture::Up),
            "down" => Ok(Gesture::Down),
            "left" => Ok(Gesture::Left),
            "right" => Ok(Gesture::Right),
            "confirm" | "center" | "enter" => Ok(Gesture::Confirm),
            other => Err(format!("unknown gesture '{}'", other)),
        }
    }
}

/// Playback commands addressed to a channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Previous,
    Next,
    /// Toggle shuffle.
    ShuffleMode,
    /// Toggle play/pause.
    PlayMode,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "previous" => Ok(Transport::Previous),
            "next" => Ok(Transport::Next),
            "shufflemode" => Ok(Transport::ShuffleMode),
            "playmode" => Ok(Transport::PlayMode),
            other => Err(format!("unknown transport command '{}'", other)),
        }
    }
}

// ── operator message ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageMode {
    /// Joins the normal rotation at the next aggregation.
    #[default]
    Playout,
    /// Joins the rotation and interrupts the current playout.
    Force,
    /// Replaces all other content and interrupts the current playout.
    Exclusive,
}

impl MessageMode {
    pub fn preempts(self) -> bool {
        !matches!(self, MessageMode::Playout)
    }
}

impl FromStr for MessageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "playout" => Ok(MessageMode::Playout),
            "force" => Ok(MessageMode::Force),
            "exclusive" => Ok(MessageMode::Exclusive),
            other => Err(format!("unknown message option '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorMessage {
    pub text: String,
    pub mode: MessageMode,
}

// ── commands ──────────────────────────────────────────────────────────────────

/// Messages sent from control-surface clients and the admin API to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    Gesture { gesture: Gesture },
    /// Select `control_id` and issue a transport command on it.
    ZoneControl { control_id: String, action: Transport },
    /// Set or clear (empty text) the operator message.
    SetMessage { message: String, option: MessageMode },
    LiveControl { control: String, value: String },
    GetState,
}

// ── snapshot ──────────────────────────────────────────────────────────────────

/// Scheduler phase as reported to observers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    #[default]
    Idle,
    Fetching,
    DisplayReady,
    Displaying,
    ClockDisplaying,
    ZoneControl,
}

/// Read-only view of the engine for monitoring.  Instants are reported
/// relative to the moment the snapshot was taken.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EngineSnapshot {
    /// Monotonic revision counter, incremented on every published change.
    #[serde(default)]
    pub rev: u64,
    pub phase: PhaseKind,
    pub fetch_in_progress: bool,
    pub fetch_done: bool,
    pub output_in_progress: bool,
    pub clock_in_progress: bool,
    pub interrupt_requested: bool,
    pub zone_control_active: bool,
    /// A background aggregation is running.
    pub build_in_flight: bool,
    pub active_payload: Option<DisplayPayload>,
    pub prepared_payload: Option<DisplayPayload>,
    /// Seconds until the next fetch; `None` means as soon as possible.
    pub next_fetch_in_secs: Option<f64>,
    pub idle_for_secs: Option<f64>,
    pub play_count: u64,
    pub last_build_secs: u64,
    pub audio_available: bool,
    pub selected_channel: Option<String>,
    pub zone_cursor: Option<String>,
    pub message: Option<OperatorMessage>,
    pub channels: Vec<Channel>,
}

/// Messages sent from the engine to control-surface clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full snapshot.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: EngineSnapshot,
    },
    State {
        data: EngineSnapshot,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_emptiness() {
        assert!(DisplayPayload::FlatText(String::new()).is_empty());
        assert!(DisplayPayload::LineSet(vec![]).is_empty());
        assert!(!DisplayPayload::LineSet(vec![String::new()]).is_empty());
        assert!(DisplayPayload::empty(OutputMode::Lines).is_empty());
        assert_eq!(DisplayPayload::empty(OutputMode::Lines).mode(), OutputMode::Lines);
    }

    #[test]
    fn test_gesture_command_frame() {
        let msg = Message::Command(Command::Gesture {
            gesture: Gesture::Left,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Gesture { gesture }) => assert_eq!(gesture, Gesture::Left),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_partial_frame_is_rejected() {
        let encoded = Message::Command(Command::GetState).encode().unwrap();
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(Message::decode(&encoded[..2]).is_err());
    }

    #[test]
    fn test_hello_carries_snapshot() {
        let state = EngineSnapshot {
            rev: 42,
            phase: PhaseKind::Displaying,
            output_in_progress: true,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: 42,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                rev,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(rev, 42);
                assert_eq!(state.phase, PhaseKind::Displaying);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&Command::ZoneControl {
            control_id: "MacStudio-Spotify".into(),
            action: Transport::ShuffleMode,
        })
        .unwrap();
        assert!(json.contains("\"cmd\":\"ZoneControl\""));
        assert!(json.contains("\"shufflemode\""));
        assert_eq!("playmode".parse::<Transport>(), Ok(Transport::PlayMode));
        assert_eq!("center".parse::<Gesture>(), Ok(Gesture::Confirm));
        assert_eq!("exclusive".parse::<MessageMode>(), Ok(MessageMode::Exclusive));
        assert!("loud".parse::<MessageMode>().is_err());
    }
}
