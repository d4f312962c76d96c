//! LDAP listener: decodes client messages and hands them to the gateway.

use std::net::{IpAddr, SocketAddr};

use futures::{SinkExt, StreamExt};
use ldap3_proto::LdapCodec;
use ldap3_proto::proto::{LdapMsg, LdapResultCode};
use ldap3_proto::simple::{DisconnectionNotice, ServerOps};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::dn;
use crate::router::Gateway;

/// What a request asks the connection to do next.
enum LdapResponseState {
    /// Reply, then remember a new bound DN (empty for anonymous).
    Bind(String, LdapMsg),
    Respond(LdapMsg),
    MultiPartResponse(Vec<LdapMsg>),
    Unbind,
    Disconnect(LdapMsg),
}

/// Accept connections on `listener` until the task is dropped.
pub async fn serve(listener: TcpListener, gateway: Gateway) {
    if let Ok(address) = listener.local_addr() {
        tracing::info!(%address, "LDAP listener started");
    }

    loop {
        match listener.accept().await {
            Ok((stream, client_address)) => {
                let gateway = gateway.clone();
                tokio::spawn(client_accept(stream, client_address, gateway));
            },
            Err(err) => {
                tracing::error!(error = %err, "failed to accept LDAP connection");
            },
        }
    }
}

async fn client_accept(
    stream: TcpStream,
    client_address: SocketAddr,
    gateway: Gateway,
) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(error = %err, "failed to set TCP_NODELAY");
    }
    client_process(stream, client_address, gateway).await
}

async fn client_process<STREAM>(
    stream: STREAM,
    client_address: SocketAddr,
    gateway: Gateway,
) where
    STREAM: AsyncRead + AsyncWrite,
{
    let (r, w) = tokio::io::split(stream);
    let mut r = FramedRead::new(r, LdapCodec::default());
    let mut w = FramedWrite::new(w, LdapCodec::default());

    let mut bound_dn = String::new();
    tracing::debug!(%client_address, "LDAP client connected");

    while let Some(Ok(protomsg)) = r.next().await {
        let msgid = protomsg.msgid;
        let task = tokio::spawn(do_op(
            gateway.clone(),
            bound_dn.clone(),
            client_address.ip(),
            protomsg,
        ));
        let state = match task.await {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(
                    %client_address,
                    msgid,
                    error = %err,
                    "request handler failed, dropping request"
                );
                continue;
            },
        };

        match state {
            LdapResponseState::Bind(dn, rmsg) => {
                if dn != bound_dn && !bound_dn.is_empty() {
                    gateway.close(&bound_dn);
                }
                bound_dn = dn;
                if w.send(rmsg).await.is_err() {
                    break;
                }
            },
            LdapResponseState::Respond(rmsg) => {
                if w.send(rmsg).await.is_err() {
                    break;
                }
            },
            LdapResponseState::MultiPartResponse(messages) => {
                let mut sent = true;
                for rmsg in messages {
                    if w.send(rmsg).await.is_err() {
                        sent = false;
                        break;
                    }
                }
                if !sent {
                    break;
                }
            },
            LdapResponseState::Unbind => break,
            LdapResponseState::Disconnect(rmsg) => {
                let _ = w.send(rmsg).await;
                break;
            },
        }
    }

    tracing::debug!(%client_address, bind_dn = %bound_dn, "LDAP client disconnected");
    gateway.close(&bound_dn);
}

async fn do_op(
    gateway: Gateway,
    bound_dn: String,
    client_ip: IpAddr,
    protomsg: LdapMsg,
) -> LdapResponseState {
    let server_op = match ServerOps::try_from(protomsg) {
        Ok(server_op) => server_op,
        Err(_) => {
            return LdapResponseState::Disconnect(DisconnectionNotice::r#gen(
                LdapResultCode::ProtocolError,
                "unsupported or invalid request",
            ));
        },
    };

    match server_op {
        ServerOps::SimpleBind(sbr) => {
            if sbr.dn.is_empty() && sbr.pw.is_empty() {
                let rmsg = sbr.gen_success();
                return LdapResponseState::Bind(String::new(), rmsg);
            }
            let outcome = gateway.bind(&sbr.dn, &sbr.pw, Some(client_ip)).await;
            let (bound, rmsg) = match outcome {
                Ok(LdapResultCode::Success) => {
                    (dn::normalize(&sbr.dn), sbr.gen_success())
                },
                Ok(LdapResultCode::InvalidCredentials) => {
                    (String::new(), sbr.gen_invalid_cred())
                },
                Ok(rc) => (String::new(), sbr.gen_error(rc, String::new())),
                Err(err) => (
                    String::new(),
                    sbr.gen_error(err.result_code(), err.to_string()),
                ),
            };
            LdapResponseState::Bind(bound, rmsg)
        },
        ServerOps::Search(sr) => {
            match gateway
                .search(
                    &bound_dn,
                    &sr.base,
                    sr.scope.clone(),
                    sr.filter.clone(),
                    sr.attrs.clone(),
                )
                .await
            {
                Ok(entries) => LdapResponseState::MultiPartResponse(
                    entries
                        .into_iter()
                        .map(|entry| sr.gen_result_entry(entry.into_ldap()))
                        .chain(std::iter::once(sr.gen_success()))
                        .collect(),
                ),
                Err(err) => LdapResponseState::Respond(
                    sr.gen_error(err.result_code(), err.to_string()),
                ),
            }
        },
        ServerOps::Unbind(_) => {
            if !bound_dn.is_empty() {
                let outcome = gateway.unbind(&bound_dn, Some(client_ip)).await;
                if let Err(err) = outcome {
                    tracing::warn!(bind_dn = %bound_dn, error = %err, "failed to unbind");
                }
            }
            LdapResponseState::Unbind
        },
        ServerOps::Compare(cr) => LdapResponseState::Respond(cr.gen_error(
            LdapResultCode::UnwillingToPerform,
            "compare is not supported".to_owned(),
        )),
        ServerOps::Whoami(wr) => {
            let authzid = if bound_dn.is_empty() {
                String::new()
            } else {
                format!("dn:{bound_dn}")
            };
            LdapResponseState::Respond(wr.gen_success(&authzid))
        },
    }
}
