use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the mediaedge proxy.
///
/// Simulates production traffic against a running instance whose origin
/// holds a `sample.png` preview, a `sample.pdf` public file and a reachable
/// HTML page:
/// - Preview images with varied parameters (cache misses)
/// - Preview images with fixed parameters (cache hits)
/// - Passthrough files and page metadata
/// - Health monitoring endpoint
///
/// # Usage
/// ```bash
/// cd loadtest
/// cargo run --release -- --host http://localhost:8080 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// Set `LOADTEST_PAGE_URL` to the page `/metadata` should fetch.

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("ImageTransformation")
                .register_transaction(transaction!(uncached_image).set_weight(5)?)
                .register_transaction(transaction!(cached_image).set_weight(15)?)
        )
        .register_scenario(
            scenario!("Passthrough")
                .register_transaction(transaction!(public_file).set_weight(5)?)
                .register_transaction(transaction!(page_metadata).set_weight(3)?)
                .register_transaction(transaction!(health_check).set_weight(1)?)
        )
        .execute()
        .await?;

    Ok(())
}

/// Random dimensions spread requests across many cache keys.
async fn uncached_image(user: &mut GooseUser) -> TransactionResult {
    // Generate random parameters before await to satisfy Send bounds
    let path = {
        let mut rng = rand::thread_rng();
        format!(
            "/images/sample.png?width={}&height={}&quality={}",
            rng.gen_range(100..1000),
            rng.gen_range(100..1000),
            rng.gen_range(40..95)
        )
    };

    let _goose = user.get(&path).await?;
    Ok(())
}

/// Fixed parameters always resolve to one warm cache entry.
async fn cached_image(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/images/sample.png?width=500&quality=80").await?;
    Ok(())
}

async fn public_file(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/files/sample.pdf").await?;
    Ok(())
}

async fn page_metadata(user: &mut GooseUser) -> TransactionResult {
    let page = std::env::var("LOADTEST_PAGE_URL").unwrap_or_else(|_| "http://localhost:3000/".to_string());
    let query = serde_urlencoded::to_string([("url", page.as_str())]).unwrap_or_default();
    let _goose = user.get(&format!("/metadata?{}", query)).await?;
    Ok(())
}

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
