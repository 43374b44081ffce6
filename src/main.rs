use splat_tiles::SessionSettings;

fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "settings.json".to_owned());
    splat_tiles::init_logging();
    let settings = SessionSettings::load_from_path(path);
    if let Err(err) = splat_tiles::run(settings) {
        eprintln!("Demo error: {err}");
        std::process::exit(1);
    }
}
