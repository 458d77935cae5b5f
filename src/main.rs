fn main() {
    if let Err(err) = solar_logger_lib::run() {
        log::error!("solar logger failed to start: {err:#}");
        eprintln!("solar logger failed to start: {err:#}");
        std::process::exit(1);
    }
}
