fn main() {
    let code = match redux::run::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("redux: error: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}
