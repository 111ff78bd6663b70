use std::sync::Arc;
use std::time::Duration;

use coopx::prelude::{ApiClient, ApiError, AuthEvent, Interceptor, OutgoingRequest, TokenStore};
use coopx::{BoxError, MemoryTokenStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tokens = Arc::new(MemoryTokenStore::with_token("expired-session-token"));
    let refresher = {
        let tokens = Arc::clone(&tokens);
        move || {
            let tokens = Arc::clone(&tokens);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                tokens.set_token("renewed-session-token".to_owned());
                true
            }
        }
    };

    let client = ApiClient::builder("http://localhost:8000/api")
        .client_name("coopx-demo-auth")
        .token_store(tokens.clone())
        .token_refresher(refresher)
        .interceptor(Interceptor::request(|mut request: OutgoingRequest| async move {
            request
                .headers
                .insert("x-attempt", request.attempt.into());
            Ok::<_, BoxError>(request)
        }))
        .interceptor(Interceptor::error(|mut error: ApiError| async move {
            if error.is_network_error {
                error.message = "You are offline. Changes will sync later.".to_owned();
            }
            Ok::<_, BoxError>(error)
        }))
        .try_build()?;

    let mut events = client.auth_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AuthEvent::TokenRefreshed => println!("auth: token refreshed"),
                AuthEvent::Unauthenticated => println!("auth: please sign in again"),
            }
        }
    });

    let (profile, savings) = tokio::join!(
        client.get("/members/me").send(),
        client.get("/savings").send()
    );
    println!("profile => {:?}", profile?.message);
    println!("savings => {:?}", savings?.message);
    println!("token now {:?}", client.token());
    Ok(())
}
