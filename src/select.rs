use crate::device::Interface;
use crate::docker::Container;
use crate::error::{Result, SnifferError};
use std::io::{BufRead, Write};

/// コンテナ一覧を表示し、選ばれたインデックスを返す
pub fn prompt_container<R: BufRead, W: Write>(
    containers: &[Container],
    input: &mut R,
    out: &mut W,
) -> Result<usize> {
    if containers.is_empty() {
        return Err(SnifferError::SelectionFailed(
            "no container with a gateway address".to_string(),
        ));
    }

    for (i, container) in containers.iter().enumerate() {
        let iface = container
            .interface
            .as_ref()
            .map_or("unresolved", |iface| iface.name.as_str());
        writeln!(
            out,
            "[{}] {} gateway {} -> {}",
            i,
            container.display_name(),
            container.gateway,
            iface
        )?;
    }
    write!(out, "Choose container by name: ")?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(SnifferError::SelectionFailed(
            "input closed before a choice was made".to_string(),
        ));
    }

    let choice = line.trim();
    let index: usize = choice
        .parse()
        .map_err(|_| SnifferError::SelectionFailed(format!("{choice:?} is not an index")))?;
    if index >= containers.len() {
        return Err(SnifferError::SelectionFailed(format!(
            "index {} out of range (0..{})",
            index,
            containers.len()
        )));
    }
    Ok(index)
}

/// 名前でコンテナを選ぶ（プロンプトなし）
pub fn find_by_name(containers: &[Container], name: &str) -> Result<usize> {
    containers
        .iter()
        .position(|container| container.has_name(name))
        .ok_or_else(|| SnifferError::SelectionFailed(format!("no container named {name:?}")))
}

/// 選ばれたコンテナのインターフェース（未解決ならゲートウェイ+マスクで `InterfaceNotFound`）
pub fn selected_interface<'a>(container: &'a Container, mask: &str) -> Result<&'a Interface> {
    container
        .interface
        .as_ref()
        .ok_or_else(|| SnifferError::InterfaceNotFound {
            target: format!("{}{}", container.gateway, mask),
        })
}

/// pcap フィルタ式を1行読む（構文は pcap-filter(7) を参照）
pub fn read_filter<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<String> {
    writeln!(out, "Type pcap filter:")?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(SnifferError::SelectionFailed(
            "input closed before a filter was given".to_string(),
        ));
    }
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn containers() -> Vec<Container> {
        vec![
            Container {
                names: vec!["/ftp".to_string()],
                gateway: "172.17.0.1".to_string(),
                interface: Some(Interface {
                    name: "docker0".to_string(),
                    addrs: vec!["172.17.0.1/16".to_string()],
                }),
            },
            Container {
                names: vec!["/db".to_string(), "/web/db".to_string()],
                gateway: "172.20.0.1".to_string(),
                interface: None,
            },
        ]
    }

    fn choose(line: &str) -> (Result<usize>, String) {
        let mut out = Vec::new();
        let result = prompt_container(&containers(), &mut Cursor::new(line), &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn lists_and_reads_index() {
        let (result, shown) = choose("1\n");
        assert_eq!(result.expect("valid index"), 1);
        assert!(shown.contains("[0] /ftp gateway 172.17.0.1 -> docker0"));
        assert!(shown.contains("[1] /db,/web/db gateway 172.20.0.1 -> unresolved"));
        assert!(shown.ends_with("Choose container by name: "));
    }

    #[test]
    fn out_of_range_is_selection_failure() {
        let (result, _) = choose("2\n");
        assert!(matches!(result, Err(SnifferError::SelectionFailed(_))));
    }

    #[test]
    fn non_numeric_and_closed_input_fail() {
        assert!(matches!(choose("ftp\n").0, Err(SnifferError::SelectionFailed(_))));
        assert!(matches!(choose("").0, Err(SnifferError::SelectionFailed(_))));
    }

    #[test]
    fn empty_listing_cannot_be_chosen_from() {
        let mut out = Vec::new();
        let result = prompt_container(&[], &mut Cursor::new("0\n"), &mut out);
        assert!(matches!(result, Err(SnifferError::SelectionFailed(_))));
    }

    #[test]
    fn preselection_by_name() {
        assert_eq!(find_by_name(&containers(), "db").expect("db"), 1);
        assert!(find_by_name(&containers(), "cache").is_err());
    }

    #[test]
    fn unresolved_container_reports_its_target() {
        let containers = containers();
        assert_eq!(
            selected_interface(&containers[0], "/16").expect("resolved").name,
            "docker0"
        );
        match selected_interface(&containers[1], "/16") {
            Err(SnifferError::InterfaceNotFound { target }) => assert_eq!(target, "172.20.0.1/16"),
            other => panic!("expected InterfaceNotFound, got {other:?}"),
        }
    }

    #[test]
    fn filter_line_is_trimmed() {
        let mut out = Vec::new();
        let filter = read_filter(&mut Cursor::new("tcp and port 21\n"), &mut out).expect("filter");
        assert_eq!(filter, "tcp and port 21");
        assert_eq!(String::from_utf8(out).unwrap(), "Type pcap filter:\n");
    }

    #[test]
    fn closed_input_gives_no_filter() {
        let mut out = Vec::new();
        let result = read_filter(&mut Cursor::new(""), &mut out);
        assert!(matches!(result, Err(SnifferError::SelectionFailed(_))));

        let blank = read_filter(&mut Cursor::new("\n"), &mut out).expect("blank line");
        assert_eq!(blank, "");
    }
}
