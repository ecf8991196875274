use fbwire::{BlobId, Database, Params, Result};

pub async fn main() -> Result<()> {
    let db = Database::connect_env().await?;

    let mut tx = db.start_transaction().await?;
    db.execute_immediate(&tx, "recreate table fbwire_blob(id integer, content blob sub_type text)").await?;
    tx.commit().await?;

    let mut tx = db.start_transaction().await?;

    let content = "lorem ipsum ".repeat(10_000);
    let mut blob = db.create_blob(&tx, &[]).await?;
    blob.put_segment(content.as_bytes()).await?;
    blob.close().await?;

    let stmt = db.prepare(&tx, "insert into fbwire_blob(id, content) values(?, ?)").await?;
    stmt.execute(&tx, &Params::new().bind(1).bind(blob.blob_id())).await?;

    let stmt = db.prepare(&tx, "select content from fbwire_blob where id = 1").await?;
    stmt.execute(&tx, &Params::new()).await?;
    let rows = stmt.fetch(1).await?;
    let id = rows[0].try_get::<_, BlobId>(0)?;

    // small blobs may arrive inline with the row
    let mut blob = db.open_blob(&tx, id, &[]).await?;
    println!("blob inline: {}", blob.is_inline());
    let data = blob.read_all().await?;
    assert_eq!(data, content.as_bytes());
    blob.close().await?;

    tx.commit().await?;
    db.detach().await?;
    Ok(())
}
