use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use lfsmon_net::RpcClient;
use lfsmon_net_tcp::{TcpConnector, TcpSocket};
use lfsmon_proto::{decode, query_method, NodeListRsp, TargetMapRsp, QUERY_SERVICE_ID};
use lfsmon_store::{CollectionName, DocumentSink, SampleDocument, SampleQuery, SampleReader, SqliteSink};
use tracing_subscriber::EnvFilter;

mod output;

use output::{OutputFormat, OutputTable, Printer};

/// Lustre performance monitor administration tool
///
/// Asks a running aggregator which nodes and targets are active, and reads
/// stored samples back from the aggregator's database.
#[derive(Parser, Debug)]
#[command(name = "lfsmon-admin", version, about)]
struct Cli {
    /// Output format (table or json).
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Storage servers the aggregator currently collects from.
    OssList(QueryArgs),
    /// Active OSTs per storage server.
    OstList(QueryArgs),
    /// Metadata servers the aggregator currently collects from.
    MdsList(QueryArgs),
    /// Active MDTs per metadata server.
    MdtList(QueryArgs),
    /// Stored samples in a time range.
    Samples {
        #[command(flatten)]
        db: DbArgs,
        /// Range start: unix seconds or RFC 3339.
        #[arg(long, value_parser = parse_time)]
        from: i64,
        /// Range end (inclusive); defaults to now.
        #[arg(long, value_parser = parse_time)]
        to: Option<i64>,
        /// Restrict to these client names; `aggr` selects target totals.
        #[arg(long = "nid")]
        nids: Vec<String>,
        /// `ost` or `mdt`.
        #[arg(long)]
        kind: Option<String>,
    },
    /// Latest completely written cycle.
    Watermark(DbArgs),
    /// Month collections present in the database.
    Collections(DbArgs),
}

#[derive(clap::Args, Debug)]
struct QueryArgs {
    /// Query service address of the aggregator.
    #[arg(long, default_value = "127.0.0.1:8889")]
    addr: String,

    /// Call timeout in seconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[derive(clap::Args, Debug)]
struct DbArgs {
    /// Database directory.
    #[arg(long, default_value = "/var/lib/lfsmon")]
    db_path: PathBuf,

    /// Database name; defaults to the filesystem name.
    #[arg(long)]
    db_name: Option<String>,

    /// Filesystem name.
    #[arg(long, default_value = "lustre")]
    fsname: String,
}

impl DbArgs {
    fn open(&self) -> anyhow::Result<Arc<dyn DocumentSink>> {
        let name = self.db_name.as_deref().unwrap_or(&self.fsname);
        let sink = SqliteSink::open(&self.db_path, name)
            .with_context(|| format!("cannot open database {name} in {}", self.db_path.display()))?;
        Ok(Arc::new(sink))
    }
}

fn parse_time(s: &str) -> Result<i64, String> {
    if let Ok(secs) = s.parse::<i64>() {
        return Ok(secs);
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.timestamp())
        .map_err(|e| format!("'{s}' is neither unix seconds nor RFC 3339: {e}"))
}

async fn call_query(args: &QueryArgs, method: u16) -> anyhow::Result<Vec<u8>> {
    let client = RpcClient::<TcpSocket>::connect(&TcpConnector::new(), &args.addr, Duration::from_secs(args.timeout))
        .await
        .with_context(|| format!("cannot reach query service at {}", args.addr))?;
    let result = client.call(QUERY_SERVICE_ID, method, b"").await;
    client.close().await;
    Ok(result?.to_vec())
}

fn node_table(rsp: NodeListRsp) -> OutputTable {
    let mut table = OutputTable::with_header(&["node"]);
    for node in rsp.nodes {
        table.push(vec![node]);
    }
    table
}

fn target_table(rsp: TargetMapRsp) -> OutputTable {
    let mut table = OutputTable::with_header(&["node", "target"]);
    for (node, targets) in rsp.targets {
        for target in targets {
            table.push(vec![node.clone(), target]);
        }
    }
    table
}

fn sample_table(docs: &[SampleDocument]) -> OutputTable {
    let mut table = OutputTable::with_header(&["time", "kind", "target", "nid", "values", "dt"]);
    for doc in docs {
        let time = DateTime::<Utc>::from_timestamp(doc.ts, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| doc.ts.to_string());
        let values = doc.v.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
        table.push(vec![
            time,
            doc.target_kind.clone(),
            doc.target.clone(),
            doc.nid.clone(),
            values,
            format!("{:.1}", doc.dt),
        ]);
    }
    table
}

async fn run(command: Command, printer: &mut Printer<std::io::Stdout>) -> anyhow::Result<()> {
    match command {
        Command::OssList(args) => {
            let rsp: NodeListRsp = decode(&call_query(&args, query_method::OSS_LIST).await?)?;
            printer.print_table(&node_table(rsp))?;
        }
        Command::MdsList(args) => {
            let rsp: NodeListRsp = decode(&call_query(&args, query_method::MDS_LIST).await?)?;
            printer.print_table(&node_table(rsp))?;
        }
        Command::OstList(args) => {
            let rsp: TargetMapRsp = decode(&call_query(&args, query_method::OST_LIST).await?)?;
            printer.print_table(&target_table(rsp))?;
        }
        Command::MdtList(args) => {
            let rsp: TargetMapRsp = decode(&call_query(&args, query_method::MDT_LIST).await?)?;
            printer.print_table(&target_table(rsp))?;
        }
        Command::Samples {
            db,
            from,
            to,
            nids,
            kind,
        } => {
            let to = to.unwrap_or_else(|| Utc::now().timestamp());
            let mut query = SampleQuery::new(from, to).with_nids(nids);
            if let Some(kind) = kind {
                query = query.with_target_kind(kind);
            }
            let docs = SampleReader::new(db.open()?, &db.fsname).query(&query).await?;
            tracing::debug!(from, to, documents = docs.len(), "samples read");
            printer.print_table(&sample_table(&docs))?;
        }
        Command::Watermark(db) => {
            match SampleReader::new(db.open()?, &db.fsname).latest_watermark().await? {
                Some(ts) => printer.print_value(&ts)?,
                None => anyhow::bail!("no watermark recorded yet"),
            }
        }
        Command::Collections(db) => {
            let mut table = OutputTable::with_header(&["collection", "month"]);
            for name in db.open()?.collections().await? {
                let month = CollectionName::parse(&name)
                    .filter(|c| c.fsname == db.fsname)
                    .map(|c| format!("{:04}-{:02}", c.year, c.month));
                if let Some(month) = month {
                    table.push(vec![name, month]);
                }
            }
            printer.print_table(&table)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let mut printer = Printer::new(std::io::stdout(), cli.format);
    run(cli.command, &mut printer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("1710504000"), Ok(1_710_504_000));
        assert_eq!(parse_time("2024-03-15T12:00:00Z"), Ok(1_710_504_000));
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_cli_parses_samples() {
        let cli = Cli::try_parse_from([
            "lfsmon-admin",
            "samples",
            "--from",
            "1710504000",
            "--nid",
            "aggr",
            "--nid",
            "node01",
            "--fsname",
            "scratch",
        ])
        .unwrap();
        match cli.command {
            Command::Samples { db, from, to, nids, kind } => {
                assert_eq!(from, 1_710_504_000);
                assert_eq!(to, None);
                assert_eq!(nids, vec!["aggr", "node01"]);
                assert_eq!(kind, None);
                assert_eq!(db.fsname, "scratch");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_target_table_flattens() {
        let mut targets = BTreeMap::new();
        targets.insert("oss1".to_string(), vec!["fs-OST0000".to_string(), "fs-OST0001".to_string()]);
        targets.insert("oss2".to_string(), vec!["fs-OST0002".to_string()]);
        let table = target_table(TargetMapRsp { targets });
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[2], vec!["oss2", "fs-OST0002"]);
    }

    #[tokio::test]
    async fn test_db_args_open_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let db = DbArgs {
            db_path: dir.path().to_path_buf(),
            db_name: None,
            fsname: "fs".into(),
        };
        let sink = db.open().unwrap();
        let doc = SampleDocument {
            ts: 1_710_504_000,
            target_kind: "ost".into(),
            target: "fs-OST0000".into(),
            nid: "aggr".into(),
            v: vec![1, 2, 3, 4],
            dt: 60.0,
        };
        sink.insert_many("fs032024", &[doc]).await.unwrap();
        let docs = SampleReader::new(db.open().unwrap(), "fs")
            .query(&SampleQuery::new(1_710_504_000, 1_710_504_060))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(sample_table(&docs).rows[0][4], "1,2,3,4");
    }
}
