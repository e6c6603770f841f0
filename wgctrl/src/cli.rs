/*
 * SPDX-FileCopyrightText: 2022 Empo Inc.
 *
 * SPDX-License-Identifier: GPL-3.0-or-later
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
 * General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ipnet::IpNet;
use log::{debug, trace};
use parking_lot::Mutex;

use crate::common::{WgBackend, WgInterface, WgPeer, WgPeerCfg};
use crate::error::WgctrlError;
use crate::key;

/// Drives an existing interface through the `wg` tool and optionally persists
/// every change with `wg-quick save`.
pub struct WgCliBackend {
    ifname: String,
    wg: PathBuf,
    wg_quick: Option<PathBuf>,
    // check-then-set sequences must not interleave
    write_lock: Mutex<()>,
}

impl WgCliBackend {
    pub fn new(
        ifname: &str,
        wg_path: &str,
        wg_quick_path: Option<&str>,
    ) -> Result<Self, WgctrlError> {
        if ifname.is_empty() || ifname.len() > 15 || ifname.contains('/') {
            return Err(WgctrlError::BadParameter {
                msg: format!("Invalid interface name {}", ifname),
            });
        }

        let wg = which::which(wg_path).map_err(|e| WgctrlError::Internal {
            msg: format!("Cannot find {}: {}", wg_path, e),
        })?;
        let wg_quick = match wg_quick_path {
            Some(x) => Some(which::which(x).map_err(|e| WgctrlError::Internal {
                msg: format!("Cannot find {}: {}", x, e),
            })?),
            None => None,
        };

        Ok(WgCliBackend {
            ifname: ifname.to_string(),
            wg,
            wg_quick,
            write_lock: Mutex::new(()),
        })
    }

    fn run(&self, program: &Path, args: &[&str], input: Option<&str>) -> Result<String, WgctrlError> {
        // Secrets only ever travel through stdin, so the command line is safe to log
        trace!("running {} {}", program.display(), args.join(" "));

        let mut expr = duct::cmd(program, args.iter().copied())
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        if let Some(x) = input {
            expr = expr.stdin_bytes(x.as_bytes().to_vec());
        }

        let output = expr.run().map_err(|e| WgctrlError::Internal {
            msg: format!("Failed to run {}: {}", program.display(), e),
        })?;

        if !output.status.success() {
            return Err(WgctrlError::Internal {
                msg: format!(
                    "{} {} failed: {}",
                    program.display(),
                    args.first().unwrap_or(&""),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn dump(&self) -> Result<(WgInterface, Vec<WgPeer>), WgctrlError> {
        let output = self.run(&self.wg, &["show", self.ifname.as_str(), "dump"], None)?;
        parse_dump(&output)
    }

    fn exists(&self, pubkey: &str) -> Result<bool, WgctrlError> {
        Ok(self.dump()?.1.iter().any(|x| x.pubkey == pubkey))
    }

    fn persist(&self) -> Result<(), WgctrlError> {
        if let Some(wg_quick) = &self.wg_quick {
            self.run(wg_quick, &["save", self.ifname.as_str()], None)?;
        }
        Ok(())
    }

    fn set_peer(&self, peer: &WgPeerCfg, replace: bool) -> Result<(), WgctrlError> {
        let allowed_ips = peer
            .allowed_ips
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<String>>()
            .join(",");
        let keep_alive = peer.keep_alive.unwrap_or(0).to_string();

        let mut args: Vec<&str> = vec!["set", self.ifname.as_str(), "peer", peer.pubkey.as_str()];
        match peer.psk {
            Some(_) => args.extend_from_slice(&["preshared-key", "/dev/stdin"]),
            None if replace => args.extend_from_slice(&["preshared-key", "/dev/null"]),
            None => {}
        }
        if let Some(endpoint) = &peer.endpoint {
            args.push("endpoint");
            args.push(endpoint.as_str());
        }
        args.extend_from_slice(&[
            "persistent-keepalive",
            keep_alive.as_str(),
            "allowed-ips",
            allowed_ips.as_str(),
        ]);

        self.run(&self.wg, &args, peer.psk.as_deref())?;
        self.persist()
    }
}

fn validate_peer(peer: &WgPeerCfg) -> Result<(), WgctrlError> {
    key::validate_key(&peer.pubkey)?;
    if let Some(psk) = &peer.psk {
        key::validate_key(psk)?;
    }
    Ok(())
}

impl WgBackend for WgCliBackend {
    fn fetch_interface(&self) -> Result<WgInterface, WgctrlError> {
        Ok(self.dump()?.0)
    }

    fn fetch_peers(&self) -> Result<Vec<WgPeer>, WgctrlError> {
        Ok(self.dump()?.1)
    }

    fn add_peer(&self, peer: &WgPeerCfg) -> Result<(), WgctrlError> {
        validate_peer(peer)?;

        let _guard = self.write_lock.lock();
        if self.exists(&peer.pubkey)? {
            return Err(WgctrlError::DuplicatedEntry {
                msg: "Duplicated peer".to_string(),
            });
        }

        self.set_peer(peer, false)?;
        debug!("wg: added peer {} on {}", peer.pubkey, self.ifname);
        Ok(())
    }

    fn update_peer(&self, peer: &WgPeerCfg) -> Result<(), WgctrlError> {
        validate_peer(peer)?;

        let _guard = self.write_lock.lock();
        if !self.exists(&peer.pubkey)? {
            return Err(WgctrlError::EntryNotFound {
                msg: "Peer not found".to_string(),
            });
        }

        self.set_peer(peer, true)?;
        debug!("wg: updated peer {} on {}", peer.pubkey, self.ifname);
        Ok(())
    }

    fn remove_peer(&self, pubkey: &str) -> Result<(), WgctrlError> {
        key::validate_key(pubkey)?;

        let _guard = self.write_lock.lock();
        if !self.exists(pubkey)? {
            return Err(WgctrlError::EntryNotFound {
                msg: "Peer not found".to_string(),
            });
        }

        self.run(
            &self.wg,
            &["set", self.ifname.as_str(), "peer", pubkey, "remove"],
            None,
        )?;
        self.persist()?;
        debug!("wg: removed peer {} from {}", pubkey, self.ifname);
        Ok(())
    }
}

fn placeholder(field: &str) -> Option<String> {
    match field {
        "" | "(none)" | "off" => None,
        x => Some(x.to_string()),
    }
}

fn parse_number<T: FromStr>(field: &str, what: &str) -> Result<T, WgctrlError> {
    field.parse().map_err(|_| WgctrlError::Internal {
        msg: format!("Unexpected {} in wg dump: {}", what, field),
    })
}

fn parse_fwmark(field: &str) -> Result<u32, WgctrlError> {
    match field {
        "off" => Ok(0),
        x if x.starts_with("0x") => {
            u32::from_str_radix(&x[2..], 16).map_err(|_| WgctrlError::Internal {
                msg: format!("Unexpected fwmark in wg dump: {}", x),
            })
        }
        x => parse_number(x, "fwmark"),
    }
}

fn parse_peer(line: &str) -> Result<WgPeer, WgctrlError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 8 {
        return Err(WgctrlError::Internal {
            msg: format!("Unexpected peer line in wg dump: {}", line),
        });
    }

    let allowed_ips = match fields[3] {
        "(none)" | "" => Vec::new(),
        x => x
            .split(',')
            .map(|ip| {
                IpNet::from_str(ip.trim()).map_err(|_| WgctrlError::Internal {
                    msg: format!("Unexpected allowed ip in wg dump: {}", ip),
                })
            })
            .collect::<Result<Vec<IpNet>, WgctrlError>>()?,
    };

    let keep_alive = match fields[7] {
        "off" => None,
        x => match parse_number::<u16>(x, "keepalive")? {
            0 => None,
            n => Some(n),
        },
    };

    Ok(WgPeer {
        pubkey: fields[0].to_string(),
        psk: placeholder(fields[1]),
        endpoint: placeholder(fields[2]),
        allowed_ips,
        keep_alive,
        latest_handshake: parse_number(fields[4], "handshake")?,
        rx_bytes: parse_number(fields[5], "transfer")?,
        tx_bytes: parse_number(fields[6], "transfer")?,
    })
}

/// Parses the tab separated output of `wg show <interface> dump`: one line
/// for the interface followed by one line per peer.
pub(crate) fn parse_dump(output: &str) -> Result<(WgInterface, Vec<WgPeer>), WgctrlError> {
    let mut lines = output.lines().filter(|x| !x.trim().is_empty());

    let header = lines.next().ok_or_else(|| WgctrlError::Internal {
        msg: "Empty wg dump".to_string(),
    })?;
    let fields: Vec<&str> = header.split('\t').collect();
    if fields.len() != 4 {
        return Err(WgctrlError::Internal {
            msg: format!("Unexpected interface line in wg dump: {}", header),
        });
    }

    let iface = WgInterface {
        private_key: placeholder(fields[0]).unwrap_or_default(),
        public_key: placeholder(fields[1]).unwrap_or_default(),
        listen_port: parse_number(fields[2], "listen port")?,
        fwmark: parse_fwmark(fields[3])?,
    };

    let peers = lines.map(parse_peer).collect::<Result<Vec<WgPeer>, WgctrlError>>()?;
    Ok((iface, peers))
}

#[cfg(test)]
mod test {
    use super::*;

    const DUMP: &str = "\
mNjcNsh9AWXfXyMG8dSrDwAmaFZkNCc5DsCDI/hPj2g=\tLCBsla9u/BT2i9yYKqCi6yHh2nKvvdgyMPVYCkLh/3Y=\t51820\toff
CkwTo0AKBXMyX9Mqf0SRrq31hZAb6s5C7k1UU94m024=\t(none)\t(none)\t10.0.0.2/32\t0\t0\t0\toff
zxUOG5Sb+wZY70iCiK5R4oeTuf1IC/e1whg8GkHl5hI=\tzxUOG5Sb+wZY70iCiK5R4oeTuf1IC/e1whg8GkHl5hI=\t1.1.1.1:51820\t10.0.0.3/32,fd42::3/128\t1650000000\t200\t100\t25
";

    #[test]
    fn test_parse_dump() {
        let (iface, peers) = parse_dump(DUMP).unwrap();

        assert_eq!(iface.public_key, "LCBsla9u/BT2i9yYKqCi6yHh2nKvvdgyMPVYCkLh/3Y=");
        assert_eq!(iface.listen_port, 51820);
        assert_eq!(iface.fwmark, 0);
        assert_eq!(peers.len(), 2);

        assert_eq!(peers[0].psk, None);
        assert_eq!(peers[0].endpoint, None);
        assert_eq!(peers[0].keep_alive, None);
        assert_eq!(peers[0].allowed_ips, vec!["10.0.0.2/32".parse::<IpNet>().unwrap()]);

        assert_eq!(peers[1].endpoint.as_deref(), Some("1.1.1.1:51820"));
        assert_eq!(peers[1].allowed_ips.len(), 2);
        assert_eq!(peers[1].latest_handshake, 1650000000);
        assert_eq!(peers[1].rx_bytes, 200);
        assert_eq!(peers[1].tx_bytes, 100);
        assert_eq!(peers[1].keep_alive, Some(25));
    }

    #[test]
    fn test_parse_dump_without_peers() {
        let (iface, peers) = parse_dump("(none)\t(none)\t0\t0x7370616b\n").unwrap();

        assert_eq!(iface.private_key, "");
        assert_eq!(iface.fwmark, 0x7370616b);
        assert!(peers.is_empty());
    }

    #[test]
    fn test_parse_dump_rejects_garbage() {
        assert!(parse_dump("").is_err());
        assert!(parse_dump("a\tb\n").is_err());
        assert!(parse_dump("a\tb\t1\toff\nbroken peer line\n").is_err());
    }
}
