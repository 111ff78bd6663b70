use std::time::Duration;

use coopx::prelude::{ApiClient, ApiResponse, ClientConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct LoanApplication<'a> {
    amount: u64,
    purpose: &'a str,
    tenure_months: u32,
}

#[derive(Debug, Deserialize)]
struct Loan {
    id: u64,
    status: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = ApiClient::builder(ClientConfig::from_env().base_url)
        .client_name("coopx-demo-basic")
        .timeout(Duration::from_secs(5))
        .retries(3)
        .retry_delay(Duration::from_millis(200))
        .try_build()?;

    let loans = client.get("/loans").query_pair("page", "1").send().await?;
    println!(
        "GET /loans => success={} status={} message={:?}",
        loans.success, loans.status, loans.message
    );

    let again = client.get("/loans").query_pair("page", "1").send().await?;
    println!("second GET /loans => {:?}", again.message);

    let application = LoanApplication {
        amount: 250_000,
        purpose: "school fees",
        tenure_months: 12,
    };
    let created: ApiResponse<Loan> = client
        .post("/loans")
        .json(&application)?
        .send_json()
        .await?;
    match created.data() {
        Some(loan) => println!("created loan id={} status={}", loan.id, loan.status),
        None => {
            println!("loan rejected: {:?}", created.message);
            for (field, messages) in created.errors.iter().flatten() {
                println!("  {field}: {}", messages.join(", "));
            }
        }
    }
    client.invalidate_cache("/loans?page=1");

    for entry in client.request_logs() {
        println!(
            "{} {} => {} in {}ms",
            entry.method,
            entry.endpoint,
            entry.status,
            entry.duration.as_millis()
        );
    }
    Ok(())
}
