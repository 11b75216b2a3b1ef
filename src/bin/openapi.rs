//! Print the OpenAPI document for the API, for spec-diffing in CI.

use anyhow::Result;
use matricula::api;

fn main() -> Result<()> {
    let spec = api::openapi();
    println!("{}", spec.to_pretty_json()?);
    Ok(())
}
