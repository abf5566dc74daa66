fn main() -> anyhow::Result<()> {
    slacklog::cli::run()
}
