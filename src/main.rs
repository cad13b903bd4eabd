fn main() {
    if let Err(err) = warehouse_ingest::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
