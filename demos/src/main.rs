use kine::config::Config;
use kine::error::CResult;
use kine::supervisor::Supervisor;

#[tokio::main]
async fn main() -> CResult<()> {
    println!("Hello, kine!");
    run().await?;
    println!("Bye~");
    Ok(())
}

async fn run() -> CResult<()> {
    let cfg = Config { db_url: "sqlite::memory:".to_string(), ..Config::default() }.normalize();
    let supervisor = Supervisor::start(&cfg).await?;
    let store = supervisor.store();

    let (rev, ok) = store.create("b", vec![0x01], 0).await?;
    assert!(ok);
    let (rev2, ok) = store.update("b", vec![0x02], 0, rev).await?;
    assert!(ok);

    store.create("e", vec![0x05], 0).await?;
    let (_, ok) = store.delete("e", store.current_revision().await?).await?;
    assert!(ok);

    store.create("a", vec![0x01], 0).await?;

    let rows = store.list_current("", None, 0, false).await?;
    let mut kvs: Vec<(String, Vec<u8>)> =
        rows.into_iter().filter(|r| r.name != "compact_rev_key").map(|r| (r.name, r.value.unwrap_or_default())).collect();
    kvs.sort();

    assert_eq!(
        kvs,
        vec![("a".to_string(), vec![0x01]), ("b".to_string(), vec![0x02])],
    );
    println!("current revision after writes: {rev2}");

    supervisor.shutdown().await?;
    Ok(())
}
