mod link;
mod world;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use codec::{
    ClientEndpoint, ClientId, CodecLimits, EncodedFrame, ListId, LoopbackNetwork, ObjectHandle,
    Receiver, ServerEndpoint, TransmitConfig, Transmitter, WireLimits, SERVER,
};
use demo_schema::{client_registry, server_registry, ModelTable};
use schema::{FieldValue, ResourceResolver};
use tools::{replay_capture, ReplayReport};
use serde::Serialize;
use wire::{decode_message, MessageKind};

use crate::link::{Rng, SimLink};
use crate::world::{World, EFFECTS, ENTITIES};

/// Models the late-joining client has loaded.
const LATE_CLIENT_MODELS: usize = 3;

/// Fields compared between server objects and client mirrors.
const CHECKED_FIELDS: [&str; 3] = ["Sequence", "Flags", "Name"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Policy {
    /// Resend unacknowledged state every frame.
    Ack,
    /// Treat every sent frame as delivered.
    Send,
}

#[derive(Parser)]
#[command(
    name = "demo-sim",
    version,
    about = "Deterministic replication demo and capture generator"
)]
struct Cli {
    /// Number of simulated players.
    #[arg(long, default_value_t = 12)]
    players: u32,
    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 300)]
    ticks: u32,
    /// Lossless ticks run after the simulation so every client converges.
    #[arg(long, default_value_t = 8)]
    settle_ticks: u32,
    /// RNG seed for deterministic results.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Number of clients. The last one joins late.
    #[arg(long, default_value_t = 2)]
    clients: u32,
    /// Tick at which the last client joins; defaults to a third of the run.
    #[arg(long)]
    late_join: Option<u32>,
    /// Percentage of frames and acks dropped in each direction.
    #[arg(long, default_value_t = 10)]
    loss_percent: u32,
    /// Gib burst cadence in ticks; 0 disables bursts.
    #[arg(long, default_value_t = 50)]
    burst_every: u32,
    /// When client snapshots advance.
    #[arg(long, value_enum, default_value_t = Policy::Ack)]
    policy: Policy,
    /// Output directory for captures.
    #[arg(long, default_value = "captures")]
    out_dir: PathBuf,
    /// Fail if any client's p95 frame size exceeds this value.
    #[arg(long)]
    max_p95_frame_bytes: Option<u64>,
    /// Fail if any client's average frame size exceeds this value.
    #[arg(long)]
    max_avg_frame_bytes: Option<u64>,
}

struct SimClient {
    id: ClientId,
    joins_at: u32,
    connected: bool,
    models: Arc<ModelTable>,
    endpoint: ClientEndpoint<SimLink>,
    frame_sizes: Vec<u64>,
    totals: ClientTotals,
}

#[derive(Debug, Clone, Default, Serialize)]
struct ClientTotals {
    creates: usize,
    updates: usize,
    destroys: usize,
    changed_fields: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if cli.policy == Policy::Send && cli.loss_percent > 0 {
        anyhow::bail!("the send policy needs a lossless link; pass --loss-percent 0");
    }

    let server_models = Arc::new(ModelTable::standard());
    let registry =
        Arc::new(server_registry(Arc::clone(&server_models)).context("build server registry")?);
    let config = match cli.policy {
        Policy::Ack => TransmitConfig::default(),
        Policy::Send => TransmitConfig::advance_on_send(),
    };

    let network = LoopbackNetwork::new();
    let mut rng = Rng::new(cli.seed);
    let mut transmitter = Transmitter::with_config(registry, config, CodecLimits::default());
    let mut world = World::spawn(&mut transmitter, &server_models, cli.players, &mut rng)?;
    let server_link = SimLink::new(network.endpoint(SERVER)?, cli.seed ^ 0x5EED, cli.loss_percent);
    let mut server = ServerEndpoint::new(transmitter, server_link);

    let late_join = cli.late_join.unwrap_or(cli.ticks / 3).max(1);
    let mut clients = (1..=cli.clients)
        .map(|n| {
            let late = cli.clients > 1 && n == cli.clients;
            new_client(&network, n, if late { late_join } else { 1 }, late, &cli)
        })
        .collect::<Result<Vec<_>>>()?;

    for tick in 1..=cli.ticks + cli.settle_ticks {
        if tick == cli.ticks + 1 {
            server.transport_mut().set_loss_percent(0);
            for client in &mut clients {
                client.endpoint.transport_mut().set_loss_percent(0);
            }
        }
        for client in clients.iter_mut().filter(|c| !c.connected && c.joins_at <= tick) {
            server
                .connect(client.id)
                .with_context(|| format!("connect {}", client.id))?;
            client.connected = true;
            log::info!("tick {tick}: {} joined", client.id);
        }
        if tick <= cli.ticks {
            world.step(
                server.transmitter_mut(),
                &server_models,
                &mut rng,
                tick,
                (cli.burst_every > 0).then_some(cli.burst_every),
            )?;
        }

        for frame in server.tick().context("server tick")? {
            record_frame(&mut clients, &frame);
        }
        if let Some((client, reason)) = server.take_disconnects().into_iter().next() {
            anyhow::bail!("server dropped {client}: {reason}");
        }
        for client in &mut clients {
            client
                .endpoint
                .poll()
                .with_context(|| format!("{} poll at tick {tick}", client.id))?;
        }
    }

    let lists = [world.entities(), world.effects()];
    for client in &clients {
        verify_mirror(server.transmitter(), client, &lists)?;
    }

    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("create output dir {}", cli.out_dir.display()))?;
    let registry_message = server
        .transmitter()
        .encode_registry_message()
        .context("encode registry message")?;
    write_file(&cli.out_dir.join("registry.bin"), &registry_message)?;

    let wire_limits = WireLimits::default();
    let mut summaries = Vec::with_capacity(clients.len());
    for client in &clients {
        let dir = cli.out_dir.join(format!("client-{}", client.id.raw()));
        let frames = write_capture(&dir, &registry_message, client, &wire_limits)?;
        let report = replay_capture(&registry_message, &frames, &wire_limits)
            .with_context(|| format!("replay {}", dir.display()))?;
        verify_replay(&report, client, &lists)?;
        summaries.push(ClientSummary::new(client, frames.len()));
    }

    let summary = Summary {
        players: cli.players,
        ticks: cli.ticks,
        settle_ticks: cli.settle_ticks,
        seed: cli.seed,
        loss_percent: cli.loss_percent,
        burst_every: cli.burst_every,
        policy: match cli.policy {
            Policy::Ack => "ack",
            Policy::Send => "send",
        },
        registry_bytes: registry_message.len(),
        respawns: world.respawns(),
        frames_dropped: server.transport().dropped(),
        clients: summaries,
    };
    summary.assert_budgets(cli.max_p95_frame_bytes, cli.max_avg_frame_bytes)?;
    write_summary_json(&cli.out_dir, &summary)?;
    log::info!(
        "wrote {} client captures to {}",
        summary.clients.len(),
        cli.out_dir.display()
    );
    Ok(())
}

fn new_client(
    network: &LoopbackNetwork,
    n: u32,
    joins_at: u32,
    late: bool,
    cli: &Cli,
) -> Result<SimClient> {
    let id = ClientId::new(n);
    let models = Arc::new(if late {
        ModelTable::partial(LATE_CLIENT_MODELS)
    } else {
        ModelTable::standard()
    });
    let registry = client_registry(Arc::clone(&models)).context("build client registry")?;
    let mut receiver = Receiver::new(Arc::new(registry));
    receiver.create_list(ENTITIES)?;
    receiver.create_list(EFFECTS)?;
    let link = SimLink::new(
        network.endpoint(id)?,
        cli.seed.wrapping_add(u64::from(n)),
        cli.loss_percent,
    )
    .recording();
    Ok(SimClient {
        id,
        joins_at,
        connected: false,
        models,
        endpoint: ClientEndpoint::new(receiver, link),
        frame_sizes: Vec::new(),
        totals: ClientTotals::default(),
    })
}

fn record_frame(clients: &mut [SimClient], frame: &EncodedFrame) {
    let Some(client) = clients.iter_mut().find(|c| c.id == frame.client) else {
        return;
    };
    client.frame_sizes.push(frame.bytes.len() as u64);
    client.totals.creates += frame.stats.creates;
    client.totals.updates += frame.stats.updates;
    client.totals.destroys += frame.stats.destroys;
    client.totals.changed_fields += frame.stats.changed_fields;
}

fn server_handles(transmitter: &Transmitter, list: ListId) -> BTreeSet<ObjectHandle> {
    transmitter
        .list(list)
        .map(|l| {
            l.iter()
                .filter(|object| !object.is_destroyed())
                .map(codec::NetworkObject::handle)
                .collect()
        })
        .unwrap_or_default()
}

fn verify_mirror(transmitter: &Transmitter, client: &SimClient, lists: &[ListId]) -> Result<()> {
    let receiver = client.endpoint.receiver();
    for &list in lists {
        let expected = server_handles(transmitter, list);
        let mirror: BTreeSet<ObjectHandle> = receiver
            .list(list)
            .map(|l| l.iter().map(codec::MirrorObject::handle).collect())
            .unwrap_or_default();
        if mirror != expected {
            anyhow::bail!(
                "{} list {} holds {} objects, server has {}",
                client.id,
                list.raw(),
                mirror.len(),
                expected.len()
            );
        }
        for handle in expected {
            let (Some(object), Some(mirrored)) = (
                transmitter.object(list, handle),
                receiver.object(list, handle),
            ) else {
                continue;
            };
            for field in CHECKED_FIELDS {
                if object.get(field) != mirrored.get(field) {
                    anyhow::bail!("{} object {handle} field {field} diverged", client.id);
                }
            }
            let model = expected_model(object.get("Model"), &client.models);
            if mirrored.get("Model") != Some(&model) {
                anyhow::bail!("{} object {handle} holds the wrong model", client.id);
            }
        }
    }
    Ok(())
}

/// The server's model as a client with `models` loaded sees it.
fn expected_model(server: Option<&FieldValue>, models: &ModelTable) -> FieldValue {
    let loaded = server
        .and_then(FieldValue::as_resource)
        .filter(|model| models.index_of(model).is_some())
        .cloned();
    FieldValue::Resource(loaded)
}

fn verify_replay(report: &ReplayReport, client: &SimClient, lists: &[ListId]) -> Result<()> {
    if let Some(frame) = report.frames.iter().find(|frame| frame.stale) {
        anyhow::bail!("{} capture {} replayed as stale", client.id, frame.name);
    }
    let receiver = client.endpoint.receiver();
    for &list in lists {
        let replayed: BTreeSet<u32> = report
            .lists
            .iter()
            .filter(|l| l.list_id == list.raw())
            .flat_map(|l| l.objects.iter().map(|object| object.handle))
            .collect();
        let mirror: BTreeSet<u32> = receiver
            .list(list)
            .map(|l| l.iter().map(|object| object.handle().raw()).collect())
            .unwrap_or_default();
        if replayed != mirror {
            anyhow::bail!(
                "{} replay of list {} disagrees with the live mirror",
                client.id,
                list.raw()
            );
        }
    }
    Ok(())
}

/// Writes the registry and every received frame; returns the frames.
fn write_capture(
    dir: &Path,
    registry_message: &[u8],
    client: &SimClient,
    limits: &WireLimits,
) -> Result<Vec<(String, Vec<u8>)>> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    write_file(&dir.join("registry.bin"), registry_message)?;

    let mut frames = Vec::new();
    for bytes in client.endpoint.transport().recorded() {
        let message = decode_message(bytes, limits).context("decode recorded message")?;
        if message.header.kind != MessageKind::Frame {
            continue;
        }
        let name = format!("frame-{:06}.bin", message.header.sequence);
        write_file(&dir.join(&name), bytes)?;
        frames.push((name, bytes.clone()));
    }
    Ok(frames)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

fn write_summary_json(out_dir: &Path, summary: &Summary) -> Result<()> {
    let path = out_dir.join("summary.json");
    let contents = serde_json::to_string_pretty(summary).context("serialize summary")?;
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct Summary {
    players: u32,
    ticks: u32,
    settle_ticks: u32,
    seed: u64,
    loss_percent: u32,
    burst_every: u32,
    policy: &'static str,
    registry_bytes: usize,
    respawns: u32,
    frames_dropped: u64,
    clients: Vec<ClientSummary>,
}

#[derive(Debug, Serialize)]
struct ClientSummary {
    client: u32,
    joined_at: u32,
    frames_sent: usize,
    frames_received: usize,
    acks_dropped: u64,
    bytes_total: u64,
    avg_frame_bytes: u64,
    p95_frame_bytes: u64,
    totals: ClientTotals,
}

impl ClientSummary {
    fn new(client: &SimClient, frames_received: usize) -> Self {
        let mut sizes = client.frame_sizes.clone();
        sizes.sort_unstable();
        let bytes_total: u64 = sizes.iter().sum();
        let (avg, p95) = if sizes.is_empty() {
            (0, 0)
        } else {
            let idx = ((sizes.len() as f64) * 0.95).ceil() as usize;
            let idx = idx.saturating_sub(1).min(sizes.len() - 1);
            (bytes_total / sizes.len() as u64, sizes[idx])
        };
        Self {
            client: client.id.raw(),
            joined_at: client.joins_at,
            frames_sent: sizes.len(),
            frames_received,
            acks_dropped: client.endpoint.transport().dropped(),
            bytes_total,
            avg_frame_bytes: avg,
            p95_frame_bytes: p95,
            totals: client.totals.clone(),
        }
    }
}

impl Summary {
    fn assert_budgets(&self, max_p95: Option<u64>, max_avg: Option<u64>) -> Result<()> {
        for client in &self.clients {
            if let Some(max_p95) = max_p95 {
                if client.p95_frame_bytes > max_p95 {
                    anyhow::bail!(
                        "client {} p95 frame bytes {} exceeds budget {}",
                        client.client,
                        client.p95_frame_bytes,
                        max_p95
                    );
                }
            }
            if let Some(max_avg) = max_avg {
                if client.avg_frame_bytes > max_avg {
                    anyhow::bail!(
                        "client {} avg frame bytes {} exceeds budget {}",
                        client.client,
                        client.avg_frame_bytes,
                        max_avg
                    );
                }
            }
        }
        Ok(())
    }
}
