use std::{env::var, time::Duration};
use fbwire::{CancelKind, Config, Connection, Database, Result};


pub async fn main() -> Result<()> {

    let config = Config::parse(&var("DATABASE_URL").unwrap())?
        .with_connect_timeout(Duration::from_secs(5));
    let db = Database::connect(config).await?;
    db.ping().await?;
    println!("protocol {}", db.protocol().revision().number());
    db.detach().await?;
    db.detach().await?;

    let db = Database::connect_env().await?;
    if db.protocol().revision().number() >= 12 {
        db.cancel_operation(CancelKind::Enable).await?;
    }
    db.detach().await?;

    // negotiate first, attach later
    let db = Connection::connect_env().await?.identify().await?;
    assert!(!db.is_attached());
    db.attach().await?;
    db.detach().await?;

    let config = Config::from_env().with_password("wrong password");
    let err = Database::connect(config).await.unwrap_err();
    println!("expected failure: {err}");

    Ok(())
}
