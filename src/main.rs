use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    forkchat::cli::main()
}
