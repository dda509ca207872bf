//! End-to-end scenarios for the broker/worker contract: backpressure,
//! acknowledgement ordering, handler isolation and the broker failure policy.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use cookq::{
    Context, CyclePolicy, Job, JobHandler, PullSocket, PullerWorker, QueueBroker, QueueClient,
    QueueConfig, QueueError, WorkerOptions,
};

fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct RecordingHandler {
    tx: mpsc::UnboundedSender<Job>,
    fail_on: Option<String>,
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        if let Some(bad) = &self.fail_on {
            if job.get_str("recipe_url") == Some(bad.as_str()) {
                anyhow::bail!("cannot scrape {bad}");
            }
        }
        self.tx.send(job)?;
        Ok(())
    }
}

/// Scenario A: one producer, one worker, both over TCP; the worker receives
/// exactly the payload that was sent, exactly once.
#[tokio::test]
async fn tcp_round_trip_delivers_the_job_once() {
    init();
    let ctx = Context::new();
    let config = QueueConfig::new("tcp://127.0.0.1:0", "tcp://127.0.0.1:0");
    let broker = QueueBroker::bind(&ctx, &config).await.unwrap();
    let intake = broker.intake_address().to_string();
    let distribution = broker.distribution_address().to_string();
    let broker_shutdown = broker.shutdown_token();
    let broker_task = tokio::spawn(broker.run());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = PullerWorker::with_options(
        &ctx,
        &distribution,
        Arc::new(RecordingHandler { tx, fail_on: None }),
        WorkerOptions {
            worker_id: Some("worker-0".into()),
            wait_timeout: Duration::from_millis(100),
            ..Default::default()
        },
    );
    let worker_shutdown = worker.shutdown_token();
    let worker_task = tokio::spawn(worker.run());

    let mut client = QueueClient::new(&ctx, &intake).unwrap();
    client.connect().await.unwrap();
    let job = Job::new().set("recipe_url", "https://example.com/r/1");
    let ack = client
        .send_timeout(&job, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(ack, job);

    let received = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, job);

    // Nothing else should arrive.
    sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());

    // Stop the worker first; tearing the broker down while the worker still
    // polls would look like a lost connection to it.
    worker_shutdown.cancel();
    worker_task.await.unwrap().unwrap();
    broker_shutdown.cancel();
    broker_task.await.unwrap().unwrap();
}

/// Scenario B: with a high-water-mark of 1 everywhere, the second send is not
/// acknowledged until the first job has been pulled. Also covers the ordering
/// guarantee: an acknowledgement never precedes the hand-off.
#[tokio::test]
async fn second_ack_waits_until_the_first_job_is_pulled() {
    init();
    let ctx = Context::new();
    let config = QueueConfig::new("inproc://intake-b", "inproc://dist-b");
    let broker = QueueBroker::bind(&ctx, &config).await.unwrap();
    let broker_shutdown = broker.shutdown_token();
    let broker_task = tokio::spawn(broker.run());

    // A worker that is attached but too slow to pull.
    let mut pull = PullSocket::connect(&ctx, "inproc://dist-b", 1).await.unwrap();

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let client_ctx = ctx.clone();
    let client_events = events.clone();
    let client_task = tokio::spawn(async move {
        let mut client = QueueClient::new(&client_ctx, "inproc://intake-b").unwrap();
        client.connect().await.unwrap();
        let first = Job::new().set("recipe_url", "https://example.com/r/1");
        let second = Job::new().set("recipe_url", "https://example.com/r/2");
        client.send(&first).await.unwrap();
        client_events.lock().unwrap().push("ack1");
        client.send(&second).await.unwrap();
        client_events.lock().unwrap().push("ack2");
    });

    // Let both sends reach the broker. Job 1 is in the distribution channel
    // (capacity 1), so job 2 must be parked, unacknowledged.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(*events.lock().unwrap(), vec!["ack1"]);

    events.lock().unwrap().push("pull1");
    let first = pull
        .recv_timeout(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first["recipe_url"], "https://example.com/r/1");

    client_task.await.unwrap();
    assert_eq!(*events.lock().unwrap(), vec!["ack1", "pull1", "ack2"]);

    let second = pull
        .recv_timeout(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second["recipe_url"], "https://example.com/r/2");

    broker_shutdown.cancel();
    broker_task.await.unwrap().unwrap();
}

/// Scenario C: a handler failure is logged and swallowed; the worker keeps
/// pulling and the next well-formed job goes through without a restart.
#[tokio::test]
async fn handler_failures_do_not_stop_the_worker() {
    init();
    let ctx = Context::new();
    let config = QueueConfig::new("inproc://intake-c", "inproc://dist-c");
    let broker = QueueBroker::bind(&ctx, &config).await.unwrap();
    let broker_shutdown = broker.shutdown_token();
    let broker_task = tokio::spawn(broker.run());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = PullerWorker::with_options(
        &ctx,
        "inproc://dist-c",
        Arc::new(RecordingHandler {
            tx,
            fail_on: Some("bad".into()),
        }),
        WorkerOptions {
            worker_id: Some("worker-0".into()),
            wait_timeout: Duration::from_millis(100),
            ..Default::default()
        },
    );
    let worker_shutdown = worker.shutdown_token();
    let worker_task = tokio::spawn(worker.run());

    let mut client = QueueClient::new(&ctx, "inproc://intake-c").unwrap();
    client.connect().await.unwrap();
    client
        .send_timeout(
            &Job::new().set("recipe_url", "bad"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    let good = Job::new().set("recipe_url", "https://example.com/r/2");
    client.send_timeout(&good, Duration::from_secs(5)).await.unwrap();

    let received = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, good);

    worker_shutdown.cancel();
    worker_task.await.unwrap().unwrap();
    broker_shutdown.cancel();
    broker_task.await.unwrap().unwrap();
}

/// Scenario D: with no worker attached the send blocks in the broker's
/// distribution backoff; it completes once a puller attaches and drains.
#[tokio::test]
async fn send_blocks_until_a_worker_attaches() {
    init();
    let ctx = Context::new();
    let config = QueueConfig::new("inproc://intake-d", "inproc://dist-d");
    let broker = QueueBroker::bind(&ctx, &config).await.unwrap();
    let broker_shutdown = broker.shutdown_token();
    let broker_task = tokio::spawn(broker.run());

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let client_ctx = ctx.clone();
    let client_events = events.clone();
    let client_task = tokio::spawn(async move {
        let mut client = QueueClient::new(&client_ctx, "inproc://intake-d").unwrap();
        client.connect().await.unwrap();
        let job = Job::new().set("recipe_url", "https://example.com/r/1");
        client.send(&job).await.unwrap();
        client_events.lock().unwrap().push("ack");
    });

    // No puller yet: the producer must still be blocked.
    sleep(Duration::from_millis(300)).await;
    assert!(events.lock().unwrap().is_empty());

    events.lock().unwrap().push("attached");
    let mut pull = PullSocket::connect(&ctx, "inproc://dist-d", 1).await.unwrap();
    let job = pull
        .recv_timeout(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job["recipe_url"], "https://example.com/r/1");

    client_task.await.unwrap();
    assert_eq!(*events.lock().unwrap(), vec!["attached", "ack"]);

    broker_shutdown.cancel();
    broker_task.await.unwrap().unwrap();
}

async fn send_garbage_frame(intake: &str) {
    let addr = intake.strip_prefix("tcp://").unwrap();
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_u32(3).await.unwrap();
    stream.write_all(b"{{{").await.unwrap();
    stream.flush().await.unwrap();
    // Hold the connection open so the broker, not an EOF, sees the frame.
    sleep(Duration::from_millis(200)).await;
}

/// Under the default fatal policy, a malformed intake request stops the broker.
#[tokio::test]
async fn malformed_request_stops_the_broker_under_fatal_policy() {
    init();
    let ctx = Context::new();
    let config = QueueConfig::new("tcp://127.0.0.1:0", "inproc://dist-p4a");
    let broker = QueueBroker::bind(&ctx, &config).await.unwrap();
    let intake = broker.intake_address().to_string();
    let broker_task = tokio::spawn(broker.run());

    send_garbage_frame(&intake).await;

    let err = timeout(Duration::from_secs(5), broker_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, QueueError::Deserialization(_)));
}

/// Under the continue policy the malformed request is logged and the next
/// cycle serves a well-formed producer.
#[tokio::test]
async fn malformed_request_is_survivable_under_continue_policy() {
    init();
    let ctx = Context::new();
    let config = QueueConfig::new("tcp://127.0.0.1:0", "inproc://dist-p4b")
        .with_cycle_policy(CyclePolicy::Continue);
    let broker = QueueBroker::bind(&ctx, &config).await.unwrap();
    let intake = broker.intake_address().to_string();
    let broker_shutdown = broker.shutdown_token();
    let broker_task = tokio::spawn(broker.run());

    let mut pull = PullSocket::connect(&ctx, "inproc://dist-p4b", 1).await.unwrap();

    send_garbage_frame(&intake).await;

    let mut client = QueueClient::new(&ctx, &intake).unwrap();
    client.connect().await.unwrap();
    let job = Job::new().set("recipe_url", "https://example.com/r/3");
    client.send_timeout(&job, Duration::from_secs(5)).await.unwrap();

    let received = pull
        .recv_timeout(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received["recipe_url"], "https://example.com/r/3");

    broker_shutdown.cancel();
    broker_task.await.unwrap().unwrap();
}
