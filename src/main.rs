fn main() -> anyhow::Result<()> {
    grocery_list::cli::run()
}
