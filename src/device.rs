use crate::error::{Result, SnifferError};
use log::{debug, info, warn};
use pnet::datalink::{self, NetworkInterface};
use std::io;

/// ホストのネットワークインターフェースのスナップショット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    /// `addr/prefix` 形式のアドレス一覧
    pub addrs: Vec<String>,
}

/// Anything that can report a name and its bound addresses as `addr/prefix`
/// strings. Reading the addresses may fail per interface.
pub trait AddressSource {
    fn name(&self) -> &str;
    fn addresses(&self) -> io::Result<Vec<String>>;
}

impl AddressSource for NetworkInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn addresses(&self) -> io::Result<Vec<String>> {
        Ok(self.ips.iter().map(ToString::to_string).collect())
    }
}

impl AddressSource for Interface {
    fn name(&self) -> &str {
        &self.name
    }

    fn addresses(&self) -> io::Result<Vec<String>> {
        Ok(self.addrs.clone())
    }
}

/// OSからインターフェース一覧を取得
pub fn host_interfaces() -> Result<Vec<NetworkInterface>> {
    let interfaces = datalink::interfaces();
    if interfaces.is_empty() {
        return Err(SnifferError::InterfaceEnumerationFailed(
            "the OS reported no network interfaces".to_string(),
        ));
    }

    for iface in &interfaces {
        debug!("Host interface {}: {:?}", iface.name, iface.ips);
    }
    Ok(interfaces)
}

/// 文字列表現が `target` と完全一致するアドレスを持つ最初のインターフェースを返す
///
/// This is a textual comparison, not CIDR containment: `172.17.0.1/16` does not
/// match a target of `172.17.0.1/24`, and no address arithmetic is attempted.
pub fn resolve<S: AddressSource>(interfaces: &[S], target: &str) -> Result<Interface> {
    for iface in interfaces {
        let addrs = match iface.addresses() {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!("Skipping interface {}: cannot read addresses: {}", iface.name(), e);
                continue;
            }
        };

        if addrs.iter().any(|addr| addr == target) {
            info!("Address {} is bound to interface {}", target, iface.name());
            return Ok(Interface {
                name: iface.name().to_string(),
                addrs,
            });
        }
    }

    warn!(
        "No interface carries {} verbatim (matching assumes the gateway prefix equals the configured mask)",
        target
    );
    Err(SnifferError::InterfaceNotFound {
        target: target.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreadable(&'static str);

    impl AddressSource for Unreadable {
        fn name(&self) -> &str {
            self.0
        }

        fn addresses(&self) -> io::Result<Vec<String>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    fn iface(name: &str, addrs: &[&str]) -> Interface {
        Interface {
            name: name.to_string(),
            addrs: addrs.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn resolves_exact_address() {
        let interfaces = vec![iface("eth0", &["10.0.5.2/16"])];
        let found = resolve(&interfaces, "10.0.5.2/16").expect("should resolve");
        assert_eq!(found.name, "eth0");
        assert_eq!(found.addrs, vec!["10.0.5.2/16"]);
    }

    #[test]
    fn first_match_in_os_order_wins() {
        let interfaces = vec![
            iface("lo", &["127.0.0.1/8"]),
            iface("docker0", &["fe80::1/64", "172.17.0.1/16"]),
            iface("br-dup", &["172.17.0.1/16"]),
        ];
        let found = resolve(&interfaces, "172.17.0.1/16").expect("should resolve");
        assert_eq!(found.name, "docker0");
    }

    #[test]
    fn missing_target_is_interface_not_found() {
        let interfaces = vec![iface("eth0", &["10.0.5.2/16"])];
        let err = resolve(&interfaces, "10.0.9.9/16").unwrap_err();
        assert!(
            matches!(err, SnifferError::InterfaceNotFound { ref target } if target == "10.0.9.9/16"),
            "{err:?}"
        );
    }

    #[test]
    fn matching_is_textual_not_cidr() {
        let interfaces = vec![iface("br-1", &["172.18.0.1/24"])];
        assert!(resolve(&interfaces, "172.18.0.1/16").is_err());
        assert!(resolve(&interfaces, "172.18.0.1").is_err());
    }

    #[test]
    fn unreadable_interface_is_skipped() {
        enum Either {
            Broken(Unreadable),
            Fine(Interface),
        }
        impl AddressSource for Either {
            fn name(&self) -> &str {
                match self {
                    Either::Broken(b) => b.name(),
                    Either::Fine(i) => i.name(),
                }
            }
            fn addresses(&self) -> io::Result<Vec<String>> {
                match self {
                    Either::Broken(b) => b.addresses(),
                    Either::Fine(i) => i.addresses(),
                }
            }
        }

        let interfaces = vec![
            Either::Broken(Unreadable("broken0")),
            Either::Fine(iface("docker0", &["172.17.0.1/16"])),
        ];
        let found = resolve(&interfaces, "172.17.0.1/16").expect("should skip broken0");
        assert_eq!(found.name, "docker0");

        let only_broken = vec![Unreadable("broken0")];
        assert!(matches!(
            resolve(&only_broken, "172.17.0.1/16"),
            Err(SnifferError::InterfaceNotFound { .. })
        ));
    }
}
