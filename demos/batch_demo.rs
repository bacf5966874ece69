use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    seqbatch::example_apps::run_batch_demo(std::env::args().skip(1))
}
