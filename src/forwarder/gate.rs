//! Hotkey gate between forwarder links and the sandbox dispatcher
//!
//! Links run on their own threads while the script engine lives on the
//! dispatcher thread. Every full boot-keyboard report is sent across and the
//! link blocks until the dispatcher answers with a verdict.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::hid::HidReport;

/// What a link does with a report after the hotkey lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No hotkey matched, write the report to the sink
    Forward,
    /// A hotkey consumed the report. `emit` is written instead, followed by
    /// a neutral report when not empty.
    Claimed { emit: Vec<HidReport> },
}

#[derive(Debug)]
pub struct DispatchRequest {
    pub link: String,
    pub report: HidReport,
    pub reply: oneshot::Sender<Verdict>,
}

#[derive(Debug, Clone)]
pub struct HotkeyGate {
    sender: Option<mpsc::Sender<DispatchRequest>>,
}

/// Bounded request channel, the receiver belongs to the dispatcher
pub fn channel(capacity: usize) -> (HotkeyGate, mpsc::Receiver<DispatchRequest>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
        HotkeyGate {
            sender: Some(sender),
        },
        receiver,
    )
}

impl HotkeyGate {
    /// Gate that forwards everything
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Blocking lookup. Must not be called from inside an async runtime.
    pub fn check(&self, link: &str, bytes: &[u8]) -> Verdict {
        let Some(sender) = &self.sender else {
            return Verdict::Forward;
        };
        // Only canonical 8-byte reports can match, and the neutral report is
        // never registered
        let Some(report) = HidReport::from_bytes(bytes) else {
            return Verdict::Forward;
        };
        if report.is_neutral() {
            return Verdict::Forward;
        }

        let (reply, response) = oneshot::channel();
        let request = DispatchRequest {
            link: link.to_string(),
            report,
            reply,
        };
        if sender.blocking_send(request).is_err() {
            debug!(link, "Dispatcher gone, forwarding report");
            return Verdict::Forward;
        }
        response.blocking_recv().unwrap_or(Verdict::Forward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOTKEY: [u8; 8] = [0x01, 0, 0x04, 0, 0, 0, 0, 0];

    #[test]
    fn test_disabled_gate_forwards() {
        assert_eq!(HotkeyGate::disabled().check("kbd", &HOTKEY), Verdict::Forward);
    }

    #[test]
    fn test_claimed_verdict_round_trip() {
        let (gate, mut requests) = channel(4);
        let dispatcher = std::thread::spawn(move || {
            let request = requests.blocking_recv().unwrap();
            assert_eq!(request.link, "kbd");
            assert_eq!(request.report.as_bytes(), &HOTKEY);
            request
                .reply
                .send(Verdict::Claimed { emit: vec![] })
                .unwrap();
        });

        assert_eq!(gate.check("kbd", &HOTKEY), Verdict::Claimed { emit: vec![] });
        dispatcher.join().unwrap();
    }

    #[test]
    fn test_non_boot_reports_skip_lookup() {
        let (gate, mut requests) = channel(4);
        assert_eq!(gate.check("kbd", &[1, 2, 3]), Verdict::Forward);
        assert_eq!(gate.check("kbd", &[0; 8]), Verdict::Forward);
        assert!(requests.try_recv().is_err());
    }

    #[test]
    fn test_dropped_dispatcher_forwards() {
        let (gate, requests) = channel(4);
        drop(requests);
        assert_eq!(gate.check("kbd", &HOTKEY), Verdict::Forward);

        // Dispatcher that drops the reply without answering
        let (gate, mut requests) = channel(4);
        let dispatcher = std::thread::spawn(move || {
            drop(requests.blocking_recv());
        });
        assert_eq!(gate.check("kbd", &HOTKEY), Verdict::Forward);
        dispatcher.join().unwrap();
    }
}
