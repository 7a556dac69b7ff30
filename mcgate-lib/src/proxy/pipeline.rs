//! Per-connection state machine: access, sniff, policy, dial, relay.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use super::connection::{ConnectionGuard, OnlineCounter, OnlineGuard};
use super::context::ConnectionContext;
use super::relay::{relay, RelayStats};
use super::stream::PrefixedStream;
use crate::config::{join_host_port, Config, MinecraftPolicy, PingMode, ServiceConfig};
use crate::error::{ProxyError, Result, SniffError};
use crate::outbound::Dialer;
use crate::protocol::kick::{self, KickContext};
use crate::protocol::{send_kick, serve_status, ChatMessage, StatusPlayers, StatusResponse, StatusVersion};
use crate::quota::{is_quota_exceeded, MeteredStream, QuotaLedger, LOGIN_DENY_PERCENTAGE};
use crate::security::{evaluate, sni_allowed, Identity};
use crate::sniff::{self, read_until, Handshake, SniffOutcome};

/// How a connection ended when nothing went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Relayed(RelayStats),
    /// Status request answered or refused without reaching the upstream
    AnsweredLocally,
}

/// Everything a session needs to be relayed upstream.
struct Route {
    target: String,
    prelude: BytesMut,
    player: Option<String>,
    online: Option<OnlineGuard>,
}

/// Connection handler of one service within one configuration generation.
#[derive(Debug)]
pub struct Pipeline {
    name: Arc<str>,
    config: Arc<Config>,
    service: ServiceConfig,
    dialer: Arc<dyn Dialer>,
    ledger: Arc<QuotaLedger>,
    online: Arc<OnlineCounter>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        service: ServiceConfig,
        dialer: Arc<dyn Dialer>,
        ledger: Arc<QuotaLedger>,
        online: Arc<OnlineCounter>,
    ) -> Self {
        Self { name: service.name.as_str().into(), config, service, dialer, ledger, online }
    }

    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    /// Run one accepted connection to completion and log how it ended.
    pub async fn handle<S>(self: Arc<Self>, client: S, peer: SocketAddr, guard: ConnectionGuard)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut ctx = ConnectionContext::new(self.name.clone(), peer);
        let span = info_span!("conn", id = %ctx.id, service = %ctx.service, %peer);
        async move {
            debug!("accepted connection");
            let result = self.serve(&mut ctx, client).await;
            let elapsed_ms = ctx.started.elapsed().as_millis() as u64;
            match result {
                Ok(SessionEnd::Relayed(stats)) => {
                    info!(
                        up = stats.client_to_upstream,
                        down = stats.upstream_to_client,
                        elapsed_ms,
                        "{ctx} closed"
                    );
                }
                Ok(SessionEnd::AnsweredLocally) => debug!(elapsed_ms, "{ctx} status answered locally"),
                Err(e) => {
                    let kind = e.kind();
                    ctx.fail(&e);
                    match e {
                        ProxyError::AccessDenied(_)
                        | ProxyError::CapacityExceeded(_)
                        | ProxyError::QuotaExceeded(_) => info!(kind, elapsed_ms, "{ctx} rejected"),
                        ProxyError::Sniff(_) => debug!(kind, elapsed_ms, "{ctx} dropped"),
                        _ => {
                            guard.service().increment_errors();
                            warn!(kind, elapsed_ms, "{ctx} failed");
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Drive the pipeline stages for `client`.
    pub async fn serve<S>(&self, ctx: &mut ConnectionContext, mut client: S) -> Result<SessionEnd>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let lists = &self.config.lists;
        if !evaluate(&self.service.ip_access, &Identity::Ip(ctx.peer.ip()), lists) {
            return Err(ProxyError::AccessDenied(format!("ip {}", ctx.peer.ip())));
        }

        let deadline = Instant::now() + self.config.timeout.sniff();
        let mut buf = BytesMut::new();
        let mut tls_seen = false;

        if let Some(policy) = &self.service.tls_sniffing {
            match before_deadline(deadline, read_until(&mut client, &mut buf, 0, sniff::sniff_tls)).await? {
                SniffOutcome::TlsClientHello { sni, .. } => {
                    ctx.hostname = sni.clone();
                    if policy.reject_if_non_match
                        && !sni_allowed(sni.as_deref(), &policy.sni_allow_list_tags, lists)
                    {
                        return Err(ProxyError::AccessDenied(format!(
                            "sni {}",
                            sni.as_deref().unwrap_or("<none>")
                        )));
                    }
                    tls_seen = true;
                }
                _ if policy.reject_non_tls => return Err(SniffError::Unrecognized.into()),
                _ => debug!("not a TLS client hello, passing through"),
            }
        }

        let route = match &self.service.minecraft {
            Some(mc) if !tls_seen => {
                match self.game_route(ctx, mc, &mut client, buf, deadline).await? {
                    Some(route) => route,
                    None => return Ok(SessionEnd::AnsweredLocally),
                }
            }
            _ => Route { target: self.service.target(), prelude: buf, player: None, online: None },
        };

        let mut upstream = match timeout(self.config.timeout.connect(), self.dialer.dial(&route.target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ProxyError::Routing { target: route.target, source }),
            Err(_) => {
                return Err(ProxyError::Routing {
                    target: route.target,
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timeout"),
                })
            }
        };
        debug!(upstream = %route.target, "connected upstream");

        let _online = route.online;
        let flow = self.service.flow;
        let limiter = &self.config.traffic_limiter;
        let stats = match route.player {
            Some(player) if limiter.enabled => {
                let metered = MeteredStream::new(client, self.ledger.clone(), player.as_str(), limiter.limit_mb);
                let mut client = PrefixedStream::new(route.prelude.freeze(), metered);
                debug!(replay = client.pending(), %player, "relaying metered session");
                relay(&mut client, &mut upstream, flow).await.map_err(|e| {
                    if is_quota_exceeded(&e) {
                        ProxyError::QuotaExceeded(player.clone())
                    } else {
                        e.into()
                    }
                })?
            }
            _ => {
                let mut client = PrefixedStream::new(route.prelude.freeze(), client);
                debug!(replay = client.pending(), "relaying session");
                relay(&mut client, &mut upstream, flow).await?
            }
        };
        Ok(SessionEnd::Relayed(stats))
    }

    /// Handshake-driven policy for a game connection.
    ///
    /// Returns `None` when a status request was handled locally.
    async fn game_route<S>(
        &self,
        ctx: &mut ConnectionContext,
        mc: &MinecraftPolicy,
        client: &mut S,
        mut buf: BytesMut,
        deadline: Instant,
    ) -> Result<Option<Route>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let strip = mc.ignore_fml_suffix;
        let handshake = read_until(client, &mut buf, 0, |b| sniff::sniff_game_handshake(b, strip));
        let hs = match before_deadline(deadline, handshake).await? {
            SniffOutcome::GameHandshake(hs) => hs,
            _ => return Err(SniffError::Unrecognized.into()),
        };
        ctx.hostname = Some(hs.hostname.clone());

        let lists = &self.config.lists;
        let mut host_allowed = evaluate(&mc.hostname_access, &Identity::Hostname(&hs.hostname), lists);
        let (upstream_host, rewrite) = match &mc.any_dest {
            Some(any) => match resolve_any_dest(&hs.hostname, &any.wildcard_root_domain) {
                Some(sub) => (sub.clone(), Some(sub)),
                None => {
                    host_allowed = false;
                    (String::new(), None)
                }
            },
            None => (self.service.target_address.clone(), mc.rewritten_hostname.clone()),
        };

        if !hs.next_state.is_login() {
            if !host_allowed {
                return Err(ProxyError::AccessDenied(format!("hostname {}", hs.hostname)));
            }
            return match mc.ping_mode {
                PingMode::Forward => Ok(Some(Route {
                    target: join_host_port(&upstream_host, self.service.target_port),
                    prelude: rewrite_prelude(&hs, rewrite.as_deref(), &buf),
                    player: None,
                    online: None,
                })),
                PingMode::Disconnect => Ok(None),
                PingMode::Fake => {
                    let pending = buf.split_off(hs.consumed);
                    let status = self.fake_status(mc, &hs);
                    before_deadline(deadline, serve_status(client, pending, &status)).await?;
                    Ok(None)
                }
            };
        }

        let login = read_until(client, &mut buf, hs.consumed, sniff::sniff_login_start);
        let player = match before_deadline(deadline, login).await? {
            SniffOutcome::GameLoginStart { player_name, .. } => player_name,
            _ => return Err(SniffError::Unrecognized.into()),
        };
        ctx.player = Some(player.clone());

        let kick_ctx = KickContext { settings: &self.config.settings, service: &self.name, player: &player };
        if !host_allowed {
            kick_client(client, &kick::access_denied(&kick_ctx)).await;
            return Err(ProxyError::AccessDenied(format!("hostname {}", hs.hostname)));
        }
        if !evaluate(&mc.name_access, &Identity::Player(&player), lists) {
            kick_client(client, &kick::access_denied(&kick_ctx)).await;
            return Err(ProxyError::AccessDenied(format!("player {player}")));
        }

        let cap = &mc.online_count;
        let limit = cap.enable_max_limit.then_some(i64::from(cap.max));
        let Some(online) = self.online.try_acquire(limit) else {
            kick_client(client, &kick::server_full(&kick_ctx)).await;
            return Err(ProxyError::CapacityExceeded(format!("{} players online", self.online.current())));
        };

        let limiter = &self.config.traffic_limiter;
        if limiter.enabled {
            let allowed = self.ledger.can_consume(&player, 0, limiter.limit_mb);
            let stats = self.ledger.stats(&player);
            if !allowed || stats.percentage >= LOGIN_DENY_PERCENTAGE {
                let msg = kick::traffic_exceeded(
                    &kick_ctx,
                    limiter.kick_message.as_deref(),
                    stats.used_mb,
                    stats.limit_mb,
                    stats.percentage,
                );
                kick_client(client, &msg).await;
                return Err(ProxyError::QuotaExceeded(player));
            }
        }

        Ok(Some(Route {
            target: join_host_port(&upstream_host, self.service.target_port),
            prelude: rewrite_prelude(&hs, rewrite.as_deref(), &buf),
            player: Some(player),
            online: Some(online),
        }))
    }

    fn fake_status(&self, mc: &MinecraftPolicy, hs: &Handshake) -> StatusResponse {
        StatusResponse {
            version: StatusVersion { name: self.config.settings.header.clone(), protocol: hs.protocol_version },
            players: StatusPlayers {
                max: mc.online_count.max,
                online: self.online.current(),
                sample: mc.online_count.sample.iter().map(Into::into).collect(),
            },
            description: ChatMessage::text(mc.motd_description.clone()),
            favicon: mc.motd_favicon.clone(),
        }
    }
}

async fn before_deadline<F, T>(deadline: Instant, step: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout_at(deadline, step).await.map_err(|_| SniffError::Timeout)?
}

async fn kick_client<S>(client: &mut S, msg: &ChatMessage)
where
    S: AsyncWrite + Unpin,
{
    if let Err(e) = send_kick(client, msg).await {
        debug!(error = %e, "failed to deliver kick message");
    }
}

/// Handshake as it should reach the upstream, followed by the rest of what
/// the client already sent.
fn rewrite_prelude(hs: &Handshake, hostname: Option<&str>, buf: &[u8]) -> BytesMut {
    let rest = buf.get(hs.consumed..).unwrap_or_default();
    let encoded = if hostname.is_none() && hs.stripped_suffix.is_none() {
        // Unchanged: replay the original bytes
        BytesMut::from(buf.get(..hs.consumed).unwrap_or_default())
    } else {
        hs.encode(hostname)
    };
    let mut out = BytesMut::with_capacity(encoded.len() + rest.len());
    out.put_slice(&encoded);
    out.put_slice(rest);
    out
}

/// Upstream host for `hostname` under a wildcard `root` domain.
///
/// `play.mc.example.com` under `mc.example.com` yields `play`.
pub fn resolve_any_dest(hostname: &str, root: &str) -> Option<String> {
    let host = hostname.trim_end_matches('.').to_ascii_lowercase();
    let root = root.trim_matches('.').to_ascii_lowercase();
    let sub = host.strip_suffix(&root)?.strip_suffix('.')?;
    (!sub.is_empty()).then(|| sub.to_string())
}
