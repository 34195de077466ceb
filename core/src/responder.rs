// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Query responder: the boundary between the DNS listener and the tunnel.
//
// A-record questions are forwarded to the ingestion pipeline. Every query,
// whatever its type, is answered with a single CNAME to the sink domain with
// TTL 0, so resolvers neither cache a usable address nor retry.

use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::rdata::CNAME;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::TunnelConfig;
use crate::error::ConfigError;

pub struct Responder {
    inbound: mpsc::Sender<String>,
    sink: Name,
}

impl Responder {
    pub fn new(inbound: mpsc::Sender<String>, sink: Name) -> Self {
        Self { inbound, sink }
    }

    pub fn from_config(
        config: &TunnelConfig,
        inbound: mpsc::Sender<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(inbound, config.sink_name()?))
    }

    /// Build the reply to a DNS request.
    ///
    /// Returns `None` for a message without a question. Waits for room in
    /// the inbound queue when it is full.
    pub async fn respond(&self, request: &Message) -> Option<Message> {
        let Some(query) = request.queries().first() else {
            debug!(id = request.id(), "request has no question");
            return None;
        };

        if query.query_type() == RecordType::A {
            let name = query.name().to_ascii();
            if self.inbound.send(name).await.is_err() {
                warn!(name = %query.name(), "ingestion pipeline stopped, fragment dropped");
            }
        }

        Some(blackhole_reply(request, query, &self.sink))
    }
}

/// Reply to `request` with one CNAME from the question name to `sink`.
pub fn blackhole_reply(request: &Message, query: &Query, sink: &Name) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_checking_disabled(request.checking_disabled())
        .set_response_code(ResponseCode::NoError);
    reply.add_query(query.clone());
    reply.add_answer(Record::from_rdata(
        query.name().clone(),
        0,
        RData::CNAME(CNAME(sink.clone())),
    ));
    reply
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};

    use super::*;

    fn request(name: &str, record_type: RecordType) -> Message {
        let mut request = Message::new();
        request
            .set_id(4242)
            .set_recursion_desired(true)
            .add_query(Query::query(Name::from_ascii(name).unwrap(), record_type));
        request
    }

    fn responder(capacity: usize) -> (Responder, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sink = TunnelConfig::default().sink_name().unwrap();
        (Responder::new(tx, sink), rx)
    }

    #[tokio::test]
    async fn a_query_is_forwarded_and_aliased() {
        let (responder, mut names) = responder(4);
        let request = request("msg1.8.0.nbuq0000.tunnel.example.com.", RecordType::A);

        let reply = responder.respond(&request).await.unwrap();
        assert_eq!(
            names.recv().await.as_deref(),
            Some("msg1.8.0.nbuq0000.tunnel.example.com.")
        );

        assert_eq!(reply.id(), 4242);
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert_eq!(reply.answers().len(), 1);

        let answer = &reply.answers()[0];
        assert_eq!(answer.name(), request.queries()[0].name());
        assert_eq!(answer.record_type(), RecordType::CNAME);
        assert_eq!(answer.ttl(), 0);
        match answer.data() {
            Some(RData::CNAME(CNAME(target))) => {
                assert_eq!(target.to_ascii(), "blackhole-1.iana.org.")
            }
            other => panic!("unexpected answer data: {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_types_are_answered_but_not_forwarded() {
        let (responder, mut names) = responder(4);
        for record_type in [RecordType::AAAA, RecordType::TXT, RecordType::MX] {
            let reply = responder
                .respond(&request("msg1.8.0.nbuq0000.tunnel.example.com.", record_type))
                .await
                .unwrap();
            assert_eq!(reply.answers().len(), 1);
            assert_eq!(reply.answers()[0].record_type(), RecordType::CNAME);
        }
        assert!(names.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_request_gets_no_reply() {
        let (responder, _names) = responder(4);
        assert!(responder.respond(&Message::new()).await.is_none());
    }

    #[tokio::test]
    async fn stopped_pipeline_still_answers() {
        let (responder, names) = responder(4);
        drop(names);
        let reply = responder
            .respond(&request("x.8.0.nbuq0000.tunnel.example.com.", RecordType::A))
            .await;
        assert!(reply.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_blocks_instead_of_dropping() {
        let (responder, mut names) = responder(1);
        let request = request("a.8.0.nbuq0000.tunnel.example.com.", RecordType::A);

        responder.respond(&request).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_secs(5), responder.respond(&request)).await;
        assert!(blocked.is_err());

        assert!(names.recv().await.is_some());
        responder.respond(&request).await.unwrap();
    }

    #[test]
    fn reply_survives_wire_roundtrip() {
        let sink = Name::from_ascii("sink.example.net.").unwrap();
        let request = request("q.4.0.aaaa.tunnel.example.com.", RecordType::A);
        let reply = blackhole_reply(&request, &request.queries()[0], &sink);

        let wire = reply.to_bytes().unwrap();
        let decoded = Message::from_bytes(&wire).unwrap();
        assert_eq!(decoded.id(), 4242);
        assert_eq!(decoded.queries(), request.queries());
        assert_eq!(decoded.answers()[0].ttl(), 0);
    }
}
