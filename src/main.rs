fn main() {
    if let Err(err) = studytimer_lib::run() {
        eprintln!("studytimer: {err:#}");
        std::process::exit(1);
    }
}
