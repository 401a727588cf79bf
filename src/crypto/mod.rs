/// Hashing and request-signing primitives for the storage engine.
///
/// The network identifies shards by RIPEMD-160(SHA-256(data)) and
/// authenticates bridge requests with Ed25519 signatures.
pub mod hash;
pub mod keys;
