//! Unit tests for message dispatch

use super::*;
use pilotlink_proto::Payload;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

type Outbox = mpsc::UnboundedSender<Message>;

fn dispatcher() -> Dispatcher<Outbox> {
    Dispatcher::new(8, 8)
}

fn counting_handler(
    counter: Arc<AtomicUsize>,
) -> impl Fn(Outbox, Message) -> futures::future::Ready<anyhow::Result<()>> + Send + Sync {
    move |_ctx, _msg| {
        counter.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Ok(()))
    }
}

#[tokio::test]
async fn test_response_goes_to_waiter_not_handler() {
    let dispatcher = dispatcher();
    let calls = Arc::new(AtomicUsize::new(0));
    dispatcher.bind(MessageType::CpuInfo, counting_handler(calls.clone())).await;

    let request = Message::request(MessageType::CpuInfo, Payload::empty());
    let slot = dispatcher.expect_response(request.id).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let reply = request.reply(Payload::encode(&"8 cores").unwrap());
    assert_eq!(dispatcher.dispatch(tx, reply.clone()).await, Dispatched::Response);

    let delivered = slot.await.unwrap();
    assert_eq!(delivered, reply);
    assert_eq!(dispatcher.pending_count().await, 0);

    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_response_delivered_exactly_once() {
    let dispatcher = dispatcher();
    let request = Message::request(MessageType::OsInfo, Payload::empty());
    let slot = dispatcher.expect_response(request.id).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let reply = request.reply(Payload::empty());
    assert_eq!(dispatcher.dispatch(tx.clone(), reply.clone()).await, Dispatched::Response);
    // A duplicate has no slot left and no handler to go to
    assert_eq!(dispatcher.dispatch(tx, reply).await, Dispatched::Unhandled);

    assert!(slot.await.is_ok());
}

#[tokio::test]
async fn test_unmatched_message_reaches_handler_which_can_reply() {
    let dispatcher = dispatcher();
    dispatcher
        .bind(MessageType::Heartbeat, |ctx: Outbox, msg: Message| async move {
            ctx.send(msg.reply(Payload::encode(&"alive")?))?;
            Ok::<_, anyhow::Error>(())
        })
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let ping = Message::request(MessageType::Heartbeat, Payload::encode(&"ping").unwrap());
    assert_eq!(dispatcher.dispatch(tx, ping.clone()).await, Dispatched::Handler);

    let reply = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(reply.id, ping.id);
    assert_eq!(reply.bind::<String>().unwrap(), "alive");
}

#[tokio::test]
async fn test_no_handler_drops_message() {
    let dispatcher = dispatcher();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let stray = Message::notification(MessageType::Other(777), Payload::empty());
    assert_eq!(dispatcher.dispatch(tx, stray).await, Dispatched::Unhandled);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_rebinding_overwrites() {
    let dispatcher = dispatcher();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    dispatcher.bind(MessageType::FileMonitor, counting_handler(first.clone())).await;
    dispatcher.bind(MessageType::FileMonitor, counting_handler(second.clone())).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let note = Message::notification(MessageType::FileMonitor, Payload::empty());
    dispatcher.dispatch(tx, note).await;

    timeout(Duration::from_secs(1), async {
        while second.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shuffled_responses_reach_their_own_callers() {
    let dispatcher = Arc::new(dispatcher());
    let (tx, _rx) = mpsc::unbounded_channel();

    let mut requests = Vec::new();
    let mut waiters = Vec::new();
    for i in 0..64u32 {
        let request = Message::request(MessageType::RunCommand, Payload::encode(&i).unwrap());
        let slot = dispatcher.expect_response(request.id).await;
        waiters.push(tokio::spawn(async move {
            let reply = slot.await.unwrap();
            (i, reply.bind::<u32>().unwrap())
        }));
        requests.push(request);
    }

    let mut replies: Vec<Message> = requests
        .iter()
        .map(|req| {
            let n: u32 = req.bind().unwrap();
            req.reply(Payload::encode(&n).unwrap())
        })
        .collect();
    replies.shuffle(&mut rand::thread_rng());

    for reply in replies {
        assert_eq!(dispatcher.dispatch(tx.clone(), reply).await, Dispatched::Response);
    }

    for waiter in waiters {
        let (sent, received) = waiter.await.unwrap();
        assert_eq!(sent, received);
    }
}

#[tokio::test]
async fn test_cancelled_call_no_longer_receives() {
    let dispatcher = dispatcher();
    let request = Message::request(MessageType::DiskInfo, Payload::empty());
    let slot = dispatcher.expect_response(request.id).await;

    assert!(dispatcher.cancel(request.id).await);
    assert!(!dispatcher.cancel(request.id).await);
    assert!(slot.await.is_err());

    let (tx, _rx) = mpsc::unbounded_channel();
    let late = request.reply(Payload::empty());
    assert_eq!(dispatcher.dispatch(tx, late).await, Dispatched::Unhandled);
}

#[tokio::test]
async fn test_fail_pending_releases_callers() {
    let dispatcher = dispatcher();
    let a = dispatcher.expect_response(Uuid::new_v4()).await;
    let b = dispatcher.expect_response(Uuid::new_v4()).await;

    assert_eq!(dispatcher.fail_pending().await, 2);
    assert!(a.await.is_err());
    assert!(b.await.is_err());
    assert_eq!(dispatcher.pending_count().await, 0);
}

#[tokio::test]
async fn test_handler_error_is_not_a_fault() {
    let dispatcher = dispatcher();
    let done = Arc::new(Notify::new());
    let signal = done.clone();
    dispatcher
        .bind(MessageType::Heartbeat, move |_ctx: Outbox, _msg: Message| {
            let signal = signal.clone();
            async move {
                signal.notify_one();
                Err::<(), _>(anyhow::anyhow!("disk full"))
            }
        })
        .await;

    let (tx, _rx) = mpsc::unbounded_channel();
    dispatcher
        .dispatch(tx, Message::notification(MessageType::Heartbeat, Payload::empty()))
        .await;
    done.notified().await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!dispatcher.fault_token().is_cancelled());
}

#[tokio::test]
async fn test_handler_panic_trips_fault_token() {
    let dispatcher = dispatcher();
    dispatcher
        .bind(MessageType::FileMonitor, |_ctx: Outbox, _msg: Message| async move {
            if true {
                panic!("handler blew up");
            }
            Ok::<_, anyhow::Error>(())
        })
        .await;

    let fault = dispatcher.fault_token();
    let (tx, _rx) = mpsc::unbounded_channel();
    dispatcher
        .dispatch(tx, Message::notification(MessageType::FileMonitor, Payload::empty()))
        .await;

    timeout(Duration::from_secs(1), fault.cancelled()).await.unwrap();
}

#[derive(Default)]
struct Progress {
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl Progress {
    fn running(&self) -> usize {
        self.started.load(Ordering::SeqCst) - self.finished.load(Ordering::SeqCst)
    }

    async fn wait_until(&self, check: impl Fn(&Self) -> bool) {
        timeout(Duration::from_secs(1), async {
            while !check(self) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}

fn gated_handler(
    gate: Arc<Notify>,
    progress: Arc<Progress>,
) -> impl Fn(Outbox, Message) -> futures::future::BoxFuture<'static, anyhow::Result<()>> + Send + Sync {
    move |_ctx, _msg| {
        let (gate, progress) = (gate.clone(), progress.clone());
        async move {
            progress.started.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            progress.finished.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_handler_pool_is_bounded_without_blocking_dispatch() {
    let dispatcher: Dispatcher<Outbox> = Dispatcher::new(2, 4);
    let gate = Arc::new(Notify::new());
    let progress = Arc::new(Progress::default());
    dispatcher
        .bind(MessageType::RunScript, gated_handler(gate.clone(), progress.clone()))
        .await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let script = || Message::request(MessageType::RunScript, Payload::empty());

    // Every dispatch returns at once; only two handlers run
    for _ in 0..4 {
        let routed = timeout(Duration::from_millis(100), dispatcher.dispatch(tx.clone(), script()))
            .await
            .unwrap();
        assert_eq!(routed, Dispatched::Handler);
    }
    progress.wait_until(|p| p.running() == 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(progress.started.load(Ordering::SeqCst), 2);

    // Responses are routed while the pool is saturated
    let call = Message::request(MessageType::CpuInfo, Payload::empty());
    let slot = dispatcher.expect_response(call.id).await;
    assert_eq!(dispatcher.dispatch(tx.clone(), call.reply(Payload::empty())).await, Dispatched::Response);
    slot.await.unwrap();

    // Releasing the running pair lets the queued pair start
    gate.notify_waiters();
    progress.wait_until(|p| p.started.load(Ordering::SeqCst) == 4).await;
    gate.notify_waiters();
    progress.wait_until(|p| p.finished.load(Ordering::SeqCst) == 4).await;
    assert!(!dispatcher.fault_token().is_cancelled());
}

#[tokio::test]
async fn test_handler_backlog_overflow_trips_fault_token() {
    let dispatcher: Dispatcher<Outbox> = Dispatcher::new(1, 1);
    let gate = Arc::new(Notify::new());
    dispatcher
        .bind(MessageType::RunScript, gated_handler(gate, Arc::default()))
        .await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let script = || Message::request(MessageType::RunScript, Payload::empty());

    assert_eq!(dispatcher.dispatch(tx.clone(), script()).await, Dispatched::Handler);
    assert_eq!(dispatcher.dispatch(tx.clone(), script()).await, Dispatched::Handler);
    assert!(!dispatcher.fault_token().is_cancelled());

    assert_eq!(dispatcher.dispatch(tx, script()).await, Dispatched::Overflow);
    assert!(dispatcher.fault_token().is_cancelled());
}
