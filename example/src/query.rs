use fbwire::{CursorFlag, Database, FetchType, Params, Result, StatementType};

pub async fn main() -> Result<()> {
    let db = Database::connect_env().await?;

    // Execute

    let mut tx = db.start_transaction().await?;
    db.execute_immediate(&tx, "recreate table fbwire(id integer, name varchar(40))").await?;
    tx.commit().await?;

    let mut tx = db.start_transaction().await?;

    let stmt = db.prepare(&tx, "insert into fbwire(id, name) values(?, ?)").await?;
    assert_eq!(stmt.statement_type().await, StatementType::Insert);
    stmt.execute(&tx, &Params::new().bind(1).bind("Deez")).await?;
    stmt.execute(&tx, &Params::new().bind(2).bind("Foo")).await?;

    let stmt = db.prepare(&tx, "insert into fbwire(id, name) values(?, ?) returning id").await?;
    let res = stmt.execute(&tx, &Params::new().bind(3).bind(None::<&str>)).await?;
    let (id,) = res.row.unwrap().decode::<(i32,)>()?;
    assert_eq!(id, 3);

    // Queries

    let stmt = db.prepare(&tx, "select id, name from fbwire order by id").await?;
    let res = stmt.execute(&tx, &Params::new()).await?;
    assert!(res.has_cursor);

    let rows = stmt.fetch(10).await?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].try_get::<_, String>("NAME")?, "Deez");
    let (_id, name) = rows[1].clone().decode::<(i32, Option<String>)>()?;
    assert_eq!(name.as_deref(), Some("Foo"));
    assert!(stmt.fetch(10).await?.is_empty());

    // Scrollable cursor

    if db.protocol().revision().number() >= 18 {
        stmt.set_cursor_flag(CursorFlag::Scrollable);
        stmt.execute(&tx, &Params::new()).await?;
        let last = stmt.fetch_scroll(FetchType::Last, 1, 0).await?;
        assert_eq!(last[0].try_get::<_, i32>(0)?, 3);
        assert_eq!(stmt.cursor_record_count().await?, 3);
        stmt.close_cursor().await?;
    }

    stmt.free().await?;
    tx.commit().await?;

    // Error case

    let tx = db.start_transaction().await?;
    db.prepare(&tx, "select foo from fbwire").await.unwrap_err();
    db.execute_immediate(&tx, "").await.unwrap_err();
    drop(tx);

    db.detach().await?;
    Ok(())
}
