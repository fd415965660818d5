//! Fixed-size worker pool over a shared shard queue.
//!
//! Workers pop shards until the queue is empty and parse each one into a
//! private per-topic map. The caller merges the returned maps on a single
//! thread, so workers never contend on results.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::{Mutex, PoisonError};
use std::thread;

use sqa_telemetry::ShardLineError;

use super::{AggregateError, Shard};

/// Per-worker result: topic to partial state.
pub(crate) type Partial<T> = HashMap<String, T>;

/// Parse every shard with `workers` threads.
///
/// Each non-blank line is fed to `parse_line`; a line it rejects aborts that
/// worker with the shard path and 1-based line number. The first error is
/// returned once all workers have finished.
pub(crate) fn run<T, F>(
    workers: usize,
    shards: Vec<Shard>,
    parse_line: F,
) -> Result<Vec<Partial<T>>, AggregateError>
where
    T: Default + Send,
    F: Fn(&mut T, &str) -> Result<(), ShardLineError> + Sync,
{
    let workers = workers.max(1).min(shards.len().max(1));
    let queue = Mutex::new(VecDeque::from(shards));

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| scope.spawn(|| drain(&queue, &parse_line)))
            .collect();

        let mut partials = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => Err(AggregateError::WorkerPanicked),
            };
            match outcome {
                Ok(partial) => partials.push(partial),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => tracing::warn!(error = %e, "additional worker failure"),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(partials),
        }
    })
}

fn drain<T, F>(
    queue: &Mutex<VecDeque<Shard>>,
    parse_line: &F,
) -> Result<Partial<T>, AggregateError>
where
    T: Default,
    F: Fn(&mut T, &str) -> Result<(), ShardLineError>,
{
    let mut partial: Partial<T> = HashMap::new();
    loop {
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(shard) = next else {
            return Ok(partial);
        };

        tracing::debug!(topic = %shard.topic, path = %shard.path.display(), "reading shard");
        let file = File::open(&shard.path).map_err(|e| AggregateError::io(&shard.path, e))?;
        let state = partial.entry(shard.topic.clone()).or_default();

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| AggregateError::io(&shard.path, e))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            parse_line(state, line).map_err(|source| AggregateError::MalformedLine {
                path: shard.path.clone(),
                line: idx + 1,
                source,
            })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> Shard {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        Shard::new(name.split('.').next().unwrap(), path)
    }

    fn count_lines(state: &mut usize, line: &str) -> Result<(), ShardLineError> {
        if line == "bad" {
            return Err(ShardLineError::MissingSeparator);
        }
        *state += 1;
        Ok(())
    }

    #[test]
    fn test_every_shard_processed_once() {
        let dir = TempDir::new().unwrap();
        let shards: Vec<Shard> = (0..10)
            .map(|i| write(&dir, &format!("t{}.log", i % 3), "a\n\nb\n"))
            .collect();

        let partials = run(4, shards, count_lines).unwrap();
        let total: usize = partials.iter().flat_map(|p| p.values()).sum();
        // 3 distinct files rewritten in place, 10 queue entries
        assert_eq!(total, 20);
    }

    #[test]
    fn test_malformed_line_reports_location() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "good.log", "a\n");
        let bad = write(&dir, "bad.log", "a\nbad\n");

        let err = run(2, vec![good, bad.clone()], count_lines).unwrap_err();
        match err {
            AggregateError::MalformedLine { path, line, .. } => {
                assert_eq!(path, bad.path);
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let shard = Shard::new("ghost", dir.path().join("ghost.log"));
        assert!(matches!(
            run(1, vec![shard], count_lines),
            Err(AggregateError::Io { .. })
        ));
    }

    #[test]
    fn test_empty_queue() {
        let partials = run::<usize, _>(6, Vec::new(), count_lines).unwrap();
        assert!(partials.iter().all(|p| p.is_empty()));
    }
}
