use data_loader::DataIndex;
use std::path::Path;
use std::time::Instant;

fn main() -> anyhow::Result<()> {
    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/shop".to_string());

    println!("Loading shop dataset from {}...\n", data_dir);

    let start = Instant::now();
    let index = DataIndex::load_from_files(Path::new(&data_dir))?;
    let elapsed = start.elapsed();

    let (users, items, interactions) = index.counts();

    println!("=== Load Complete ===");
    println!("Time taken:   {:?}", elapsed);
    println!("Users:        {}", users);
    println!("Items:        {}", items);
    println!("Interactions: {}", interactions);
    println!(
        "\nThroughput: {:.0} interactions/second",
        interactions as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
