//! CLI probe for the shot timeline engine.
//!
//! # Responsibility
//! - Print core linkage info (`ping`, `version`).
//! - Run a scripted `demo` over a SQLite store and print each resulting order.

use futures::executor::block_on;
use shotframe_core::{
    ConcurrencyGuard, ExchangeCoordinator, Gesture, PositionKey, SequenceSnapshot,
    SqliteSequenceStore,
};
use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("ping") => {
            println!("shotframe_core ping={}", shotframe_core::ping());
            println!("shotframe_core version={}", shotframe_core::core_version());
            ExitCode::SUCCESS
        }
        Some("demo") => match run_demo(args.get(1).map(String::as_str)) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("demo failed: {err}");
                ExitCode::FAILURE
            }
        },
        Some(other) => {
            eprintln!("unknown command `{other}`; expected ping|demo [db_path]");
            ExitCode::from(2)
        }
    }
}

fn run_demo(db_path: Option<&str>) -> Result<(), Box<dyn Error>> {
    let store = match db_path {
        Some(path) => SqliteSequenceStore::open(path)?,
        None => SqliteSequenceStore::open_in_memory()?,
    };
    let shot = store.create_shot("demo")?;
    let mut ids = Vec::new();
    for frame in [0.0, 50.0, 100.0, 150.0] {
        ids.push(store.insert_item(shot, PositionKey::new(frame))?.item_id);
    }
    let loose = store.insert_item(shot, None)?.item_id;

    let coordinator = ExchangeCoordinator::new(store);
    block_on(async {
        print_order("initial", &coordinator.load(shot).await?);

        let swapped = coordinator.exchange_positions(shot, ids[0], ids[1]).await?;
        print_order("swap first two", &swapped.snapshot);

        let mut desired = swapped.snapshot.ordered_ids();
        desired.rotate_right(1);
        let reordered = coordinator.reorder(shot, &desired).await?;
        print_order(
            &format!("reorder ({} swaps)", reordered.plan.swap_count()),
            &reordered.snapshot,
        );

        let guard = ConcurrencyGuard::new(shot);
        guard.begin_drag(reordered.snapshot)?;
        let committed = guard
            .commit(
                &coordinator,
                Gesture::MoveBlock {
                    moving: vec![loose],
                    target_index: 0,
                },
            )
            .await?;
        print_order("place loose item at head", &committed.snapshot);

        let respaced = coordinator.respace(shot).await?;
        print_order("respace", &respaced.snapshot);
        Ok::<(), Box<dyn Error>>(())
    })
}

fn print_order(label: &str, snapshot: &SequenceSnapshot) {
    println!("{label}:");
    for item in snapshot.items() {
        let frame = item
            .position
            .map_or_else(|| "-".to_string(), |key| key.to_string());
        println!("  {frame:>10}  {}", item.item_id);
    }
}
