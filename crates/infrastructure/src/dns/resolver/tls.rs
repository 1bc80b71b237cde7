use std::sync::{Arc, OnceLock};

use rustls::{ClientConfig, RootCertStore};

/// Webpki-backed client config shared by the TLS-based transports; the
/// root store is built once per process.
pub fn tls_client_config(alpn: &[&[u8]]) -> Arc<ClientConfig> {
    static ROOTS: OnceLock<Arc<RootCertStore>> = OnceLock::new();
    let roots = ROOTS.get_or_init(|| {
        let mut store = RootCertStore::empty();
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(store)
    });

    let mut config = ClientConfig::builder()
        .with_root_certificates(Arc::clone(roots))
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Arc::new(config)
}
