//! Wire transport for the Wallet Façade (§6): a plaintext listener on port
//! 3321 and a TLS listener on port 2121, both speaking the same
//! JSON-RPC-shaped request/response framed over raw HTTP/1.1.

pub mod server;
