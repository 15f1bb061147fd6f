//! Per-group serialized episode queues.
//!
//! Submissions for one group run strictly in FIFO order; distinct groups run
//! concurrently. Workers are not long-lived: the first submission for a group
//! spawns one, it drains the queue, exits, and a later submission spawns a
//! fresh one.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Default)]
struct GroupQueue {
    jobs: VecDeque<Job>,
    /// A worker task is currently draining this queue.
    draining: bool,
}

/// Lazily-spawned per-group FIFO workers.
#[derive(Clone, Default)]
pub struct EpisodeQueues {
    groups: Arc<Mutex<HashMap<String, GroupQueue>>>,
}

impl EpisodeQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a submission for a group and return its queued position
    /// (1-based). Spawns a worker if none is draining the group.
    pub async fn submit<F>(&self, group_id: &str, job: F) -> usize
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut groups = self.groups.lock().await;
        let queue = groups.entry(group_id.to_string()).or_default();
        queue.jobs.push_back(Box::pin(job));
        let position = queue.jobs.len();

        if !queue.draining {
            queue.draining = true;
            let queues = self.clone();
            let group = group_id.to_string();
            tokio::spawn(async move {
                queues.drain(group).await;
            });
        }
        position
    }

    /// Number of queued (not yet started) submissions for a group.
    pub async fn pending(&self, group_id: &str) -> usize {
        let groups = self.groups.lock().await;
        groups.get(group_id).map(|q| q.jobs.len()).unwrap_or(0)
    }

    async fn drain(self, group_id: String) {
        loop {
            let job = {
                let mut groups = self.groups.lock().await;
                match groups.get_mut(&group_id) {
                    Some(queue) => match queue.jobs.pop_front() {
                        Some(job) => job,
                        None => {
                            // Drained; the entry goes away so the map stays
                            // bounded by the set of active groups.
                            groups.remove(&group_id);
                            break;
                        }
                    },
                    None => break,
                }
            };
            job.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn per_group_submissions_run_in_fifo_order() {
        let queues = EpisodeQueues::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..4 {
            let tx = tx.clone();
            queues
                .submit("g1", async move {
                    // A later job finishing faster must not overtake.
                    tokio::time::sleep(Duration::from_millis(10 * (4 - i))).await;
                    tx.send(format!("E{}", i + 1)).unwrap();
                })
                .await;
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(name) = rx.recv().await {
            seen.push(name);
        }
        assert_eq!(seen, vec!["E1", "E2", "E3", "E4"]);
    }

    #[tokio::test]
    async fn distinct_groups_run_concurrently() {
        let queues = EpisodeQueues::new();
        let gate = Arc::new(tokio::sync::Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        // g1's worker parks until g2 finishes; if groups were serialized
        // behind one worker this would deadlock the test.
        let parked = gate.clone();
        queues
            .submit("g1", async move {
                parked.notified().await;
            })
            .await;

        let tx2 = tx.clone();
        queues
            .submit("g2", async move {
                tx2.send("F1").unwrap();
            })
            .await;

        let name = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("g2 should complete while g1 is parked")
            .unwrap();
        assert_eq!(name, "F1");
        gate.notify_one();
    }

    #[tokio::test]
    async fn queued_position_reflects_backlog() {
        let queues = EpisodeQueues::new();
        let gate = Arc::new(tokio::sync::Notify::new());

        let parked = gate.clone();
        let first = queues.submit("g", async move { parked.notified().await }).await;
        assert_eq!(first, 1);
        // The worker may have already claimed the first job, so the second
        // lands at position 1 or 2 depending on scheduling; it must be >= 1.
        let second = queues.submit("g", async {}).await;
        assert!(second >= 1);
        gate.notify_one();
    }

    #[tokio::test]
    async fn worker_respawns_after_drain() {
        let queues = EpisodeQueues::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx1 = tx.clone();
        queues.submit("g", async move { tx1.send(1).unwrap() }).await;
        assert_eq!(rx.recv().await, Some(1));

        // Give the worker time to exit, then submit again.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queues.pending("g").await, 0);

        let tx2 = tx.clone();
        queues.submit("g", async move { tx2.send(2).unwrap() }).await;
        assert_eq!(rx.recv().await, Some(2));
    }
}
