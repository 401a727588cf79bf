/// JSON wire types for the bridge REST surface.
///
/// Field names mirror the bridge's camelCase JSON; everything here is a
/// plain value type with no behavior of its own.
use serde::{Deserialize, Serialize};

/// A farmer's contact record, as embedded in pointers and the contact
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_key: Option<String>,
}

/// Bridge-issued directive connecting a shard to a farmer, a transfer
/// token and the shard hash. Consumed once by a data-channel transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pointer {
    pub index: usize,
    pub hash: String,
    pub size: u64,
    /// Channel direction: `PUSH` (upload) or `PULL` (download).
    pub operation: String,
    pub token: String,
    pub farmer: Contact,
}

/// A shard descriptor as recorded in a staging frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameShard {
    pub hash: String,
    pub size: u64,
    pub index: usize,
}

/// A staging frame: the bridge-side accumulator for a file's shard
/// descriptors before finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: String,
    #[serde(default)]
    pub shards: Vec<FrameShard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

/// Request body for `PUT /frames/{id}`: the shard descriptor plus its
/// audit material and the farmers to exclude from contract negotiation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardDescriptor {
    pub hash: String,
    pub size: u64,
    pub index: usize,
    pub challenges: Vec<String>,
    pub tree: Vec<String>,
    pub exclude: Vec<String>,
}

/// A user-owned bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

/// A finalized bucket entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub id: String,
    pub bucket: String,
    pub frame: String,
    pub mimetype: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A short-lived PUSH/PULL token for a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub token: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

/// A public key registered with the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyEntry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// An account record as returned by the user endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_decodes_bridge_json() {
        let raw = r#"{
            "index": 2,
            "hash": "fde400fe0b6a5488e10d7317274a096aaa57914d",
            "size": 8388608,
            "operation": "PULL",
            "token": "99cf1af00b522941c08c7a49d8d8fd398cc5148subtoken",
            "farmer": {
                "nodeID": "32033d2dc11b877df4b1caefbffba06495ae6b18",
                "address": "farmer.example.com",
                "port": 4000
            }
        }"#;

        let pointer: Pointer = serde_json::from_str(raw).unwrap();
        assert_eq!(pointer.index, 2);
        assert_eq!(pointer.size, 8_388_608);
        assert_eq!(pointer.operation, "PULL");
        assert_eq!(
            pointer.farmer.node_id,
            "32033d2dc11b877df4b1caefbffba06495ae6b18"
        );
        assert!(pointer.farmer.protocol.is_none());
    }

    #[test]
    fn test_shard_descriptor_serializes_camel_case() {
        let descriptor = ShardDescriptor {
            hash: "ab".into(),
            size: 10,
            index: 0,
            challenges: vec!["c1".into()],
            tree: vec!["l1".into(), "l2".into()],
            exclude: vec!["bad-node".into()],
        };

        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["hash"], "ab");
        assert_eq!(value["challenges"][0], "c1");
        assert_eq!(value["exclude"][0], "bad-node");
    }

    #[test]
    fn test_frame_defaults_empty_shards() {
        let frame: Frame = serde_json::from_str(r#"{"id":"f1"}"#).unwrap();
        assert_eq!(frame.id, "f1");
        assert!(frame.shards.is_empty());
    }
}
