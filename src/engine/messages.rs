//! Engine-side protocol types. The network layer translates wire JSON
//! into [`ClientRequest`]s and renders [`Outbound`] frames back to
//! connected clients through the [`ClientSink`] seam, keeping the
//! engine free of any transport detail.

use serde::Serialize;

use super::automation::StreamInfo;
use super::easing::Easing;

/// Tempo/signature overrides carried on a client message; unset fields
/// fall back to the live transport values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClockOverride {
    pub tempo: Option<f64>,
    pub numerator: Option<u32>,
    pub denominator: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub id: Option<String>,
    pub controller: u8,
    /// Defaults to 0 when unset.
    pub from: Option<u8>,
    pub to: u8,
    pub duration_ms: f64,
    pub channel: u8,
    pub easing: Easing,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClientRequest {
    PlayTrack {
        program: String,
        clock: ClockOverride,
    },
    PlayCycle {
        program: String,
        id: Option<String>,
        clock: ClockOverride,
    },
    QueueTrack {
        program: String,
        clock: ClockOverride,
    },
    QueueCycle {
        program: String,
        id: Option<String>,
        clock: ClockOverride,
    },
    UpdateCycle {
        program: String,
        id: Option<String>,
        clock: ClockOverride,
    },
    ClearCycle {
        id: String,
    },
    ClearAllCycles,
    SendCc {
        controller: u8,
        value: u8,
        channel: u8,
    },
    StreamCc(StreamRequest),
    StreamMultipleCc(Vec<StreamRequest>),
    StopCcStream {
        id: Option<String>,
        controller: Option<u8>,
        channel: Option<u8>,
    },
    StopAllCcStreams,
    GetActiveCcStreams {
        client: u64,
    },
}

/// Frames pushed to WebSocket clients.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    /// Sent on every beat change.
    #[serde(rename = "beat", rename_all = "camelCase")]
    Beat {
        /// 1-based beat within the bar.
        beat: i64,
        bar: i64,
        /// Absolute 1-based beat count since the song origin.
        beat_number: i64,
    },
    /// Sent on clock updates and on connect.
    #[serde(rename = "tempoAndSignature", rename_all = "camelCase")]
    TempoAndSignature {
        tempo: f64,
        signature_numerator: u32,
        signature_denominator: u32,
    },
    #[serde(rename = "activeCCStreams")]
    ActiveCcStreams { streams: Vec<StreamInfo> },
}

/// Write-only view of the connected clients. Implemented by the
/// WebSocket hub; the engine never blocks on it.
pub trait ClientSink: Send + Sync {
    fn broadcast(&self, frame: &Outbound);
    fn send_to(&self, client: u64, frame: &Outbound);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_wire_format() {
        let beat = serde_json::to_string(&Outbound::Beat {
            beat: 2,
            bar: 5,
            beat_number: 18,
        })
        .unwrap();
        assert_eq!(
            beat,
            r#"{"type":"beat","beat":2,"bar":5,"beatNumber":18}"#
        );

        let tempo = serde_json::to_string(&Outbound::TempoAndSignature {
            tempo: 120.0,
            signature_numerator: 4,
            signature_denominator: 4,
        })
        .unwrap();
        assert!(tempo.contains(r#""type":"tempoAndSignature""#));
        assert!(tempo.contains(r#""signatureNumerator":4"#));

        let streams = serde_json::to_string(&Outbound::ActiveCcStreams {
            streams: vec![],
        })
        .unwrap();
        assert_eq!(
            streams,
            r#"{"type":"activeCCStreams","streams":[]}"#
        );
    }
}
