use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

/// Records the peak number of jobs running at once
#[derive(Default)]
struct Recorder {
    running: AtomicUsize,
    peak: AtomicUsize,
    done: Mutex<Vec<IpAddr>>,
}

#[async_trait]
impl JobHandler for Recorder {
    async fn handle(&self, job: Job) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.done.lock().unwrap().push(job.ip());
    }
}

fn discovery(ip: &str) -> Job {
    Job::Discovery {
        ip: ip.parse().unwrap(),
        subnet: "10.0.0.0/24".to_string(),
    }
}

async fn run_jobs(jobs: Vec<Job>, workers: usize) -> Arc<Recorder> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (queue, rx) = JobQueue::channel(16);
    let recorder = Arc::new(Recorder::default());
    let locks = IpLocks::new(Duration::from_millis(5));
    let pool = WorkerPool::spawn(workers, rx, recorder.clone(), locks, &shutdown_rx);
    assert_eq!(pool.len(), workers);

    let count = jobs.len();
    let mut send_shutdown = shutdown_tx.subscribe();
    for job in jobs {
        queue.send(job, &mut send_shutdown).await.unwrap();
    }
    for _ in 0..200 {
        if recorder.done.lock().unwrap().len() == count {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(()).unwrap();
    pool.join().await;
    recorder
}

#[tokio::test]
async fn test_same_ip_jobs_never_overlap() {
    let jobs = (0..4).map(|_| discovery("10.0.0.1")).collect();
    let recorder = run_jobs(jobs, 4).await;
    assert_eq!(recorder.done.lock().unwrap().len(), 4);
    assert_eq!(recorder.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_different_ips_run_in_parallel() {
    let jobs = (1..=4).map(|i| discovery(&format!("10.0.0.{}", i))).collect();
    let recorder = run_jobs(jobs, 4).await;
    assert_eq!(recorder.done.lock().unwrap().len(), 4);
    assert!(recorder.peak.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_workers_exit_on_shutdown() {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (_queue, rx) = JobQueue::channel(1);
    let pool = WorkerPool::spawn(
        2,
        rx,
        Arc::new(Recorder::default()),
        IpLocks::new(Duration::from_millis(5)),
        &shutdown_rx,
    );
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), pool.join())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_send_on_full_queue_returns_on_shutdown() {
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let (queue, _rx) = JobQueue::channel(1);
    assert_ok!(queue.send(discovery("10.0.0.1"), &mut shutdown_rx).await);

    shutdown_tx.send(()).unwrap();
    assert_eq!(
        queue.send(discovery("10.0.0.2"), &mut shutdown_rx).await,
        Err(QueueError::Shutdown)
    );
}

#[tokio::test]
async fn test_send_after_receiver_dropped() {
    let (_shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let (queue, rx) = JobQueue::channel(1);
    drop(rx);
    assert_eq!(
        queue.send(discovery("10.0.0.1"), &mut shutdown_rx).await,
        Err(QueueError::Closed)
    );
}

#[tokio::test]
async fn test_ip_guard_releases_on_drop() {
    let locks = IpLocks::new(Duration::from_millis(5));
    let ip: IpAddr = "10.0.0.1".parse().unwrap();

    let guard = locks.try_acquire(ip).unwrap();
    assert_eq!(guard.ip(), ip);
    assert!(locks.is_locked(&ip));
    assert!(locks.try_acquire(ip).is_none());
    assert!(locks.try_acquire("10.0.0.2".parse().unwrap()).is_some());

    drop(guard);
    assert!(!locks.is_locked(&ip));
    assert!(locks.try_acquire(ip).is_some());
}

#[tokio::test]
async fn test_acquire_waits_then_gives_up_on_shutdown() {
    let locks = IpLocks::new(Duration::from_millis(5));
    let ip: IpAddr = "10.0.0.1".parse().unwrap();
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    let held = locks.try_acquire(ip).unwrap();
    assert_err!(locks.try_acquire(ip).ok_or(()));
    let waiter = {
        let locks = locks.clone();
        tokio::spawn(async move { locks.acquire(ip, &mut shutdown_rx).await.is_some() })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(()).unwrap();
    assert!(!waiter.await.unwrap());
    drop(held);
}
