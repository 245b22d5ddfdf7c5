//! redmesh command-line entry point.

fn main() -> anyhow::Result<()> {
    redmesh::cli::run_cli()
}
