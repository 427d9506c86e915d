// A relay of workers over one shared set.
//
// Worker i sleeps until worker i - 1 signals that its leg is finished, then
// registers with the set, runs one insert/verify/remove burst over its own
// key range, and signals worker i + 1. Only the public set API is used.

use harrier::OrderedSet;

use std::process::exit;
use std::sync::mpsc;
use std::thread;

const KEYS_PER_WORKER: i64 = 1024;
const MAX_WORKERS: usize = 128; // the set's registration limit

fn main() {
    let mut args = std::env::args();
    let name = args.next().unwrap_or_else(|| "relay".into());

    let workers: usize = match args.next().and_then(|n| n.parse().ok()) {
        Some(n) if (1..=MAX_WORKERS).contains(&n) => n,
        _ => {
            eprintln!("usage: {name} <workers 1..={MAX_WORKERS}>");
            exit(2);
        }
    };

    let set = OrderedSet::<i64>::new();

    thread::scope(|s| {
        // the baton: the first worker may start immediately
        let (start, mut baton) = mpsc::channel();
        start.send(()).unwrap();

        for worker in 0..workers {
            let (done, next) = mpsc::channel();
            let previous = std::mem::replace(&mut baton, next);
            let set = &set;

            s.spawn(move || {
                previous.recv().expect("previous worker died");

                let handle = set.register();
                let base = worker as i64 * KEYS_PER_WORKER;

                for key in 1..=KEYS_PER_WORKER {
                    set.insert(base + key, &handle);
                }
                for key in 1..=KEYS_PER_WORKER {
                    assert!(set.contains(&(base + key), &handle));
                }
                for key in 1..=KEYS_PER_WORKER {
                    assert!(set.remove(&(base + key), &handle));
                }

                println!("worker {worker} finished its leg");
                done.send(()).unwrap();
            });
        }

        baton.recv().expect("last worker died");
    });

    println!("relay finished: {workers} workers, final size {}", set.len());
}
