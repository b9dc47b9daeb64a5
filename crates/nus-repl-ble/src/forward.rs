//! Routes GATT notifications into the session's notify queue.

use futures::{Stream, StreamExt};
use nus_repl_core::NotifySender;
use uuid::Uuid;

use crate::pybricks::{PYBRICKS_COMMAND_EVENT_UUID, StatusReport};

/// Why forwarding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardEnd {
    /// The notification stream ended.
    StreamEnded,
    /// The adapter reported our device as disconnected.
    Disconnected,
    /// The hub program stopped after having run.
    ProgramStopped,
    /// Nobody is reading the queue any more.
    QueueClosed,
}

/// Forwarding rules for one link.
#[derive(Debug, Clone, Copy)]
pub struct Forwarder<I> {
    tx_uuid: Uuid,
    hub_mode: bool,
    peripheral: I,
}

impl<I: PartialEq> Forwarder<I> {
    #[must_use]
    pub const fn new(tx_uuid: Uuid, hub_mode: bool, peripheral: I) -> Self {
        Self {
            tx_uuid,
            hub_mode,
            peripheral,
        }
    }

    /// Deliver TX notifications until the link ends.
    ///
    /// `disconnects` yields the ids of devices the adapter lost; only ours
    /// ends forwarding. In hub mode a status report without the running
    /// flag ends forwarding once a running report has been seen. `notify`
    /// is dropped on return, which closes the queue.
    pub async fn run<N, D>(
        self,
        notifications: N,
        disconnects: D,
        notify: NotifySender,
    ) -> ForwardEnd
    where
        N: Stream<Item = (Uuid, Vec<u8>)> + Unpin,
        D: Stream<Item = I> + Unpin,
    {
        let mut notifications = notifications.fuse();
        let mut disconnects = disconnects.fuse();
        let mut program_seen = false;
        loop {
            tokio::select! {
                item = notifications.next() => {
                    let Some((uuid, value)) = item else {
                        tracing::debug!("Notification stream ended");
                        return ForwardEnd::StreamEnded;
                    };
                    if uuid == self.tx_uuid {
                        if notify.deliver(value).await.is_err() {
                            return ForwardEnd::QueueClosed;
                        }
                    } else if self.hub_mode && uuid == PYBRICKS_COMMAND_EVENT_UUID {
                        let Some(report) = StatusReport::parse(&value) else {
                            continue;
                        };
                        if report.program_running() {
                            program_seen = true;
                        } else if program_seen {
                            tracing::info!("Hub program stopped");
                            return ForwardEnd::ProgramStopped;
                        }
                    }
                }
                Some(id) = disconnects.next() => {
                    if id == self.peripheral {
                        tracing::debug!("Device disconnected event");
                        return ForwardEnd::Disconnected;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;
    use nus_repl_core::{NUS_TX_CHAR_UUID, notify_queue};

    use super::*;

    const HUB: u8 = 1;

    fn tx(data: &[u8]) -> (Uuid, Vec<u8>) {
        (NUS_TX_CHAR_UUID, data.to_vec())
    }

    fn status(running: bool) -> (Uuid, Vec<u8>) {
        let flags: u32 = if running { 1 << 6 } else { 0 };
        let mut event = vec![0x00];
        event.extend_from_slice(&flags.to_le_bytes());
        (PYBRICKS_COMMAND_EVENT_UUID, event)
    }

    #[tokio::test]
    async fn test_tx_chunks_delivered_in_order() {
        let (notify, mut rx) = notify_queue(8);
        let notifications = stream::iter(vec![tx(b"Hel"), status(true), tx(b"lo\n")]);

        let end = Forwarder::new(NUS_TX_CHAR_UUID, false, HUB)
            .run(notifications, stream::pending(), notify)
            .await;

        assert_eq!(end, ForwardEnd::StreamEnded);
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"Hel");
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"lo\n");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_program_stop_counts_only_after_running() {
        let (notify, mut rx) = notify_queue(8);
        let notifications = stream::iter(vec![
            status(false),
            tx(b"a"),
            status(true),
            tx(b"b"),
            status(false),
            tx(b"c"),
        ])
        .chain(stream::pending());

        let end = Forwarder::new(NUS_TX_CHAR_UUID, true, HUB)
            .run(notifications, stream::pending(), notify)
            .await;

        assert_eq!(end, ForwardEnd::ProgramStopped);
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"a");
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"b");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_status_ignored_outside_hub_mode() {
        let (notify, mut rx) = notify_queue(8);
        let notifications = stream::iter(vec![status(true), status(false), tx(b"ok")]);

        let end = Forwarder::new(NUS_TX_CHAR_UUID, false, HUB)
            .run(notifications, stream::pending(), notify)
            .await;

        assert_eq!(end, ForwardEnd::StreamEnded);
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"ok");
    }

    #[tokio::test]
    async fn test_other_device_disconnect_ignored() {
        let (notify, mut rx) = notify_queue(8);
        let notifications = stream::iter(vec![tx(b"x")]).chain(stream::pending());
        let disconnects = stream::iter(vec![7u8]).chain(stream::pending());

        let mut forward = tokio::spawn(
            Forwarder::new(NUS_TX_CHAR_UUID, false, HUB).run(notifications, disconnects, notify),
        );

        assert_eq!(rx.recv().await.unwrap().as_ref(), b"x");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut forward)
                .await
                .is_err()
        );
        forward.abort();
    }

    #[tokio::test]
    async fn test_own_disconnect_closes_queue() {
        let (notify, mut rx) = notify_queue(8);
        let disconnects = stream::iter(vec![7u8, HUB]);

        let end = Forwarder::new(NUS_TX_CHAR_UUID, false, HUB)
            .run(stream::pending(), disconnects, notify)
            .await;

        assert_eq!(end, ForwardEnd::Disconnected);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_stops_forwarding() {
        let (notify, rx) = notify_queue(1);
        drop(rx);
        let notifications = stream::iter(vec![tx(b"lost")]).chain(stream::pending());

        let end = Forwarder::new(NUS_TX_CHAR_UUID, false, HUB)
            .run(notifications, stream::pending(), notify)
            .await;

        assert_eq!(end, ForwardEnd::QueueClosed);
    }
}
