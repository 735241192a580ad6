use feednorm::prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument() -> InstrumentId {
        InstrumentId::new("ETH/USD", "XBTS")
    }

    fn book_for(ids: &[u64]) -> Message {
        let mut book = BookUpdate::new(instrument(), 500);
        book.bids.push(BookLevel::new(100, 1));
        book.asks.push(BookLevel::new(101, 1));
        book.subscription_ids = ids.iter().map(|id| RequestId(*id)).collect();
        Message::Book(book)
    }

    // --- std channels ---

    #[test]
    fn test_std_routes_by_stamped_ids() {
        let fanout = FanoutStd::new();
        let rx1 = fanout.subscribe(RequestId(1));
        let rx2 = fanout.subscribe(RequestId(2));
        let rx3 = fanout.subscribe(RequestId(3));

        assert_eq!(fanout.dispatch(&book_for(&[1, 3])), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_ok());
    }

    #[test]
    fn test_std_routes_single_id_replies() {
        let fanout = FanoutStd::new();
        let rx1 = fanout.subscribe(RequestId(1));
        let rx2 = fanout.subscribe(RequestId(2));

        let reply = Message::SubscriptionOnline {
            original_id: RequestId(1),
        };
        assert_eq!(fanout.dispatch(&reply), 1);
        assert!(matches!(
            rx1.try_recv().unwrap(),
            Message::SubscriptionOnline { .. }
        ));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_std_broadcasts_messages_without_ids() {
        let fanout = FanoutStd::new();
        let rx1 = fanout.subscribe(RequestId(1));
        let rx2 = fanout.subscribe(RequestId(2));

        assert_eq!(fanout.dispatch(&Message::Reset), 2);
        assert!(matches!(rx1.try_recv().unwrap(), Message::Reset));
        assert!(matches!(rx2.try_recv().unwrap(), Message::Reset));
    }

    #[test]
    fn test_std_unknown_ids_deliver_nowhere() {
        let fanout = FanoutStd::new();
        let rx = fanout.subscribe(RequestId(1));

        assert_eq!(fanout.dispatch(&book_for(&[9])), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_std_unsubscribe_closes_the_lane() {
        let fanout = FanoutStd::new();
        let _rx1 = fanout.subscribe(RequestId(1));
        let _rx2 = fanout.subscribe(RequestId(2));
        assert_eq!(fanout.subscriber_count(), 2);

        assert!(fanout.unsubscribe(RequestId(1)));
        assert!(!fanout.unsubscribe(RequestId(1)));
        assert!(!fanout.has_subscriber(RequestId(1)));
        assert_eq!(fanout.subscriber_ids(), vec![RequestId(2)]);
        assert_eq!(fanout.dispatch(&book_for(&[1, 2])), 1);
    }

    #[test]
    fn test_std_prunes_dead_channels() {
        let fanout = FanoutStd::new();
        let _rx1 = fanout.subscribe(RequestId(1));
        let rx2 = fanout.subscribe(RequestId(2));
        drop(rx2);

        // the first delivery attempt notices the closed end and drops it
        assert_eq!(fanout.dispatch(&Message::Reset), 1);
        assert_eq!(fanout.subscriber_count(), 1);
        assert!(!fanout.has_subscriber(RequestId(2)));
    }

    #[test]
    fn test_std_resubscribe_replaces_the_channel() {
        let fanout = FanoutStd::new();
        let stale = fanout.subscribe(RequestId(1));
        let fresh = fanout.subscribe(RequestId(1));
        assert_eq!(fanout.subscriber_count(), 1);

        assert_eq!(fanout.dispatch(&book_for(&[1])), 1);
        assert!(fresh.try_recv().is_ok());
        assert!(stale.try_recv().is_err());
    }

    // --- tokio channels ---

    #[tokio::test]
    async fn test_tokio_routes_by_stamped_ids() {
        let fanout = FanoutTokio::new();
        let mut rx1 = fanout.subscribe(RequestId(1));
        let mut rx2 = fanout.subscribe(RequestId(2));

        assert_eq!(fanout.dispatch(&book_for(&[1])), 1);
        assert!(matches!(rx1.try_recv().unwrap(), Message::Book(_)));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tokio_broadcasts_messages_without_ids() {
        let fanout = FanoutTokio::new();
        let mut rx1 = fanout.subscribe(RequestId(1));
        let mut rx2 = fanout.subscribe(RequestId(2));

        assert_eq!(fanout.dispatch(&Message::Disconnect), 2);
        assert!(matches!(rx1.try_recv().unwrap(), Message::Disconnect));
        assert!(matches!(rx2.try_recv().unwrap(), Message::Disconnect));
    }

    #[tokio::test]
    async fn test_tokio_prunes_dead_channels() {
        let fanout = FanoutTokio::new();
        let _rx1 = fanout.subscribe(RequestId(1));
        let rx2 = fanout.subscribe(RequestId(2));
        drop(rx2);

        assert_eq!(fanout.dispatch(&Message::Reset), 1);
        assert_eq!(fanout.subscriber_count(), 1);
        assert!(!fanout.has_subscriber(RequestId(2)));
    }
}
