/// Full recovery pipeline through the library crates: collect two nodes'
/// metadata from a scripted iteration service, diff each against the
/// reference, and merge the diffs into per-node recovery queues.
#[cfg(test)]
mod pipeline {
    use recovery::{
        merge, Collected, IterationDriver, IterationOptions, IterationService, IteratorElement,
        IteratorRequest, IteratorResponse, RecordSource,
    };
    use std::time::Duration;
    use stream::{Address, Key, Record, RecordStream, Timestamp};

    struct Snapshot(Vec<Record>);

    struct Replay(std::vec::IntoIter<Record>, u64, u64);

    impl Iterator for Replay {
        type Item = anyhow::Result<IteratorElement>;

        fn next(&mut self) -> Option<Self::Item> {
            let r = self.0.next()?;
            self.1 += 1;
            Some(Ok(IteratorElement {
                status: 0,
                response: IteratorResponse {
                    status: 0,
                    key: r.key,
                    timestamp: r.timestamp,
                    size: r.size,
                    user_flags: r.user_flags,
                    iterated_keys: self.1,
                    total_keys: self.2,
                },
            }))
        }
    }

    impl RecordSource for Replay {
        fn elapsed_time(&self) -> Duration {
            Duration::from_millis(1)
        }
    }

    impl IterationService for Snapshot {
        fn start_iterator(&self, _: &IteratorRequest) -> anyhow::Result<Box<dyn RecordSource>> {
            let total = self.0.len() as u64;
            Ok(Box::new(Replay(self.0.clone().into_iter(), 0, total)))
        }
    }

    fn node(port: u16) -> Address {
        Address::new("127.0.0.1", port, 1)
    }

    fn rec(k: u64, ts: u64) -> Record {
        Record::new(Key::from(k), Timestamp::new(ts, 0), 10, 0)
    }

    fn collect_node(dir: &std::path::Path, port: u16, records: Vec<Record>) -> RecordStream {
        let driver = IterationDriver::new(Snapshot(records), node(port), false);
        let opts = IterationOptions {
            tmp_dir: dir.to_path_buf(),
            batch_size: 2,
            sort_chunk_records: 3,
            ..IterationOptions::default()
        };
        let outcome = driver.start(opts).unwrap().finish().expect("iteration succeeds");
        match outcome.collected {
            Collected::Whole(mut s) => {
                s.sort().unwrap();
                s
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    fn keys(stream: &mut RecordStream) -> Vec<(Key, u64)> {
        stream
            .iter()
            .unwrap()
            .map(|r| r.unwrap())
            .map(|r| (r.key, r.timestamp.tsec))
            .collect()
    }

    #[test]
    fn collect_diff_merge() {
        let dir = tempfile::tempdir().unwrap();

        let mut reference = collect_node(dir.path(), 1, vec![rec(4, 1), rec(1, 1), rec(2, 1)]);
        let mut a = collect_node(dir.path(), 2, vec![rec(3, 7), rec(1, 5), rec(2, 1), rec(6, 2)]);
        let mut b = collect_node(dir.path(), 3, vec![rec(1, 9), rec(6, 1), rec(5, 4)]);

        // What the reference lacks, per source node.
        let mut diff_a = a.diff(&mut reference).unwrap();
        let mut diff_b = b.diff(&mut reference).unwrap();
        assert_eq!(
            keys(&mut diff_a),
            vec![(Key::from(1), 5), (Key::from(3), 7), (Key::from(6), 2)]
        );
        assert_eq!(
            keys(&mut diff_b),
            vec![(Key::from(1), 9), (Key::from(5), 4), (Key::from(6), 1)]
        );

        // Re-attach each diff to the node it came from before merging.
        let pa = dir.path().join("from-a");
        let pb = dir.path().join("from-b");
        drop(diff_a.copy_to(&pa).unwrap());
        drop(diff_b.copy_to(&pb).unwrap());
        let mut diffs = vec![
            RecordStream::open(&pa, node(2), true).unwrap(),
            RecordStream::open(&pb, node(3), true).unwrap(),
        ];

        let mut queues = merge(&mut diffs, &dir.path().join("queues")).unwrap();
        assert_eq!(queues.len(), 2);
        assert_eq!(
            keys(&mut queues[0]),
            vec![(Key::from(3), 7), (Key::from(6), 2)]
        );
        assert_eq!(
            keys(&mut queues[1]),
            vec![(Key::from(1), 9), (Key::from(5), 4)]
        );
    }
}
