use crate::core::PlayerEvent;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// 事件总线 - 播放器向所有订阅者广播状态变化
///
/// 订阅者丢弃接收端后会在下一次广播时被移除。
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: PlayerEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransportState;

    #[test]
    fn test_publish_reaches_all_and_prunes_dropped() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(PlayerEvent::StateChanged(TransportState::Loaded));
        assert_eq!(a.try_recv(), Ok(PlayerEvent::StateChanged(TransportState::Loaded)));
        assert_eq!(b.try_recv(), Ok(PlayerEvent::StateChanged(TransportState::Loaded)));

        drop(b);
        bus.publish(PlayerEvent::EndOfStream);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(a.try_recv(), Ok(PlayerEvent::EndOfStream));
    }
}
