fn main() {
    simparity::cli::run();
}
