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

use std::convert::TryFrom;
use std::fmt;
use std::hash::Hash;
#[cfg(test)]
use std::marker::PhantomData;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use custom_error::custom_error;
use ipnet::{Ipv4Net, Ipv6Net};

custom_error! {pub SubnetParseError
    InvalidFormat{input: String} = "Invalid subnet {input}",
    PrefixOutOfRange{input: String, max: u8} = "Prefix of {input} is out of range 0..{max}",
    HostBitsSet{input: String} = "Subnet {input} has non-zero host bits",
}

/// CIDR arithmetic shared by both address families.
///
/// Addresses are handled as unsigned integers widened to `u128`; an IPv4
/// subnet simply never sets bits above the 32nd. Ordering is lexicographic on
/// `(base, prefix)`, so a subnet always sorts before every subnet it contains.
pub trait IpSubnet:
    Copy
    + Eq
    + Ord
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr<Err = SubnetParseError>
    + Send
    + Sync
    + 'static
{
    type Addr: Copy + fmt::Display;

    const MAX_PREFIX: u8;

    /// Builds a subnet from its base and prefix. Host bits must already be
    /// clear and `prefix` must not exceed `MAX_PREFIX`.
    fn raw(bits: u128, prefix: u8) -> Self;
    fn bits(&self) -> u128;
    fn prefix(&self) -> u8;
    /// Single address subnet (/32 or /128).
    fn host(addr: Self::Addr) -> Self;

    fn full_mask() -> u128 {
        if Self::MAX_PREFIX >= 128 {
            u128::MAX
        } else {
            (1u128 << Self::MAX_PREFIX) - 1
        }
    }

    fn mask(prefix: u8) -> u128 {
        match prefix {
            0 => 0,
            p => (u128::MAX << (Self::MAX_PREFIX - p)) & Self::full_mask(),
        }
    }

    #[cfg(test)]
    fn last(&self) -> u128 {
        self.bits() | (Self::full_mask() & !Self::mask(self.prefix()))
    }

    /// Number of addresses. An IPv6 /0 holds 2^128 and is clamped to
    /// `u128::MAX`.
    fn size(&self) -> u128 {
        match Self::MAX_PREFIX - self.prefix() {
            shift if shift >= 128 => u128::MAX,
            shift => 1u128 << shift,
        }
    }

    fn contains(&self, other: &Self) -> bool {
        self.prefix() <= other.prefix() && other.bits() & Self::mask(self.prefix()) == self.bits()
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Lower and upper half, `None` for a single address.
    fn split(&self) -> Option<(Self, Self)> {
        if self.prefix() >= Self::MAX_PREFIX {
            return None;
        }
        let prefix = self.prefix() + 1;
        let half = 1u128 << (Self::MAX_PREFIX - prefix);
        Some((
            Self::raw(self.bits(), prefix),
            Self::raw(self.bits() | half, prefix),
        ))
    }

    fn parent(&self) -> Option<Self> {
        match self.prefix() {
            0 => None,
            p => Some(Self::raw(self.bits() & Self::mask(p - 1), p - 1)),
        }
    }

    /// The other half of the parent.
    fn sibling(&self) -> Option<Self> {
        match self.prefix() {
            0 => None,
            p => Some(Self::raw(self.bits() ^ (1u128 << (Self::MAX_PREFIX - p)), p)),
        }
    }

    /// Every single address subnet inside `self`, in ascending order.
    #[cfg(test)]
    fn hosts(&self) -> Hosts<Self> {
        Hosts {
            next: Some(self.bits()),
            last: self.last(),
            marker: PhantomData,
        }
    }

    /// Minimal set of subnets covering `self` minus `other`, found by
    /// bisecting `self` towards `other`. Sorted ascending.
    fn subtract(&self, other: &Self) -> Vec<Self> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        if other.contains(self) {
            return Vec::new();
        }

        let mut rest = Vec::new();
        let mut current = *self;
        while current.prefix() < other.prefix() {
            let (lower, upper) = match current.split() {
                Some(x) => x,
                None => break,
            };
            if lower.contains(other) {
                rest.push(upper);
                current = lower;
            } else {
                rest.push(lower);
                current = upper;
            }
        }
        rest.sort();
        rest
    }
}

#[cfg(test)]
pub struct Hosts<S> {
    next: Option<u128>,
    last: u128,
    marker: PhantomData<S>,
}

#[cfg(test)]
impl<S: IpSubnet> Iterator for Hosts<S> {
    type Item = S;

    fn next(&mut self) -> Option<S> {
        let current = self.next?;
        self.next = match current < self.last {
            true => Some(current + 1),
            false => None,
        };
        Some(S::raw(current, S::MAX_PREFIX))
    }
}

fn check_prefix(input: &str, prefix: &str, max: u8) -> Result<(), SubnetParseError> {
    let prefix: u8 = prefix.parse().map_err(|_| SubnetParseError::InvalidFormat {
        input: input.to_string(),
    })?;
    match prefix > max {
        true => Err(SubnetParseError::PrefixOutOfRange {
            input: input.to_string(),
            max,
        }),
        false => Ok(()),
    }
}

/// IPv4 subnet; prefix 32 is a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subnet {
    base: u32,
    prefix: u8,
}

impl Subnet {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, SubnetParseError> {
        if prefix > Self::MAX_PREFIX {
            return Err(SubnetParseError::PrefixOutOfRange {
                input: format!("{}/{}", addr, prefix),
                max: Self::MAX_PREFIX,
            });
        }
        let base = u32::from(addr);
        if u128::from(base) & !Self::mask(prefix) != 0 {
            return Err(SubnetParseError::HostBitsSet {
                input: format!("{}/{}", addr, prefix),
            });
        }
        Ok(Subnet { base, prefix })
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base)
    }
}

impl IpSubnet for Subnet {
    type Addr = Ipv4Addr;

    const MAX_PREFIX: u8 = 32;

    fn raw(bits: u128, prefix: u8) -> Self {
        Subnet {
            base: bits as u32,
            prefix,
        }
    }

    fn bits(&self) -> u128 {
        u128::from(self.base)
    }

    fn prefix(&self) -> u8 {
        self.prefix
    }

    fn host(addr: Ipv4Addr) -> Self {
        Subnet {
            base: u32::from(addr),
            prefix: Self::MAX_PREFIX,
        }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr(), self.prefix)
    }
}

impl FromStr for Subnet {
    type Err = SubnetParseError;

    /// `a.b.c.d/p`, or a bare address for a single host.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let invalid = || SubnetParseError::InvalidFormat {
            input: input.to_string(),
        };
        match input.split_once('/') {
            Some((_, prefix)) => {
                check_prefix(input, prefix, Self::MAX_PREFIX)?;
                Subnet::try_from(input.parse::<Ipv4Net>().map_err(|_| invalid())?)
            }
            None => Ok(Subnet::host(input.parse().map_err(|_| invalid())?)),
        }
    }
}

impl TryFrom<Ipv4Net> for Subnet {
    type Error = SubnetParseError;

    fn try_from(net: Ipv4Net) -> Result<Self, Self::Error> {
        Subnet::new(net.addr(), net.prefix_len())
    }
}

impl From<Subnet> for Ipv4Net {
    fn from(subnet: Subnet) -> Self {
        Ipv4Net::new(subnet.addr(), subnet.prefix).expect("prefix checked on construction")
    }
}

/// IPv6 subnet; prefix 128 is a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubnetV6 {
    base: u128,
    prefix: u8,
}

impl SubnetV6 {
    pub fn new(addr: Ipv6Addr, prefix: u8) -> Result<Self, SubnetParseError> {
        if prefix > Self::MAX_PREFIX {
            return Err(SubnetParseError::PrefixOutOfRange {
                input: format!("{}/{}", addr, prefix),
                max: Self::MAX_PREFIX,
            });
        }
        let base = u128::from(addr);
        if base & !Self::mask(prefix) != 0 {
            return Err(SubnetParseError::HostBitsSet {
                input: format!("{}/{}", addr, prefix),
            });
        }
        Ok(SubnetV6 { base, prefix })
    }

    pub fn addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.base)
    }
}

impl IpSubnet for SubnetV6 {
    type Addr = Ipv6Addr;

    const MAX_PREFIX: u8 = 128;

    fn raw(bits: u128, prefix: u8) -> Self {
        SubnetV6 { base: bits, prefix }
    }

    fn bits(&self) -> u128 {
        self.base
    }

    fn prefix(&self) -> u8 {
        self.prefix
    }

    fn host(addr: Ipv6Addr) -> Self {
        SubnetV6 {
            base: u128::from(addr),
            prefix: Self::MAX_PREFIX,
        }
    }
}

impl fmt::Display for SubnetV6 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr(), self.prefix)
    }
}

impl FromStr for SubnetV6 {
    type Err = SubnetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let invalid = || SubnetParseError::InvalidFormat {
            input: input.to_string(),
        };
        match input.split_once('/') {
            Some((_, prefix)) => {
                check_prefix(input, prefix, Self::MAX_PREFIX)?;
                SubnetV6::try_from(input.parse::<Ipv6Net>().map_err(|_| invalid())?)
            }
            None => Ok(SubnetV6::host(input.parse().map_err(|_| invalid())?)),
        }
    }
}

impl TryFrom<Ipv6Net> for SubnetV6 {
    type Error = SubnetParseError;

    fn try_from(net: Ipv6Net) -> Result<Self, Self::Error> {
        SubnetV6::new(net.addr(), net.prefix_len())
    }
}

impl From<SubnetV6> for Ipv6Net {
    fn from(subnet: SubnetV6) -> Self {
        Ipv6Net::new(subnet.addr(), subnet.prefix).expect("prefix checked on construction")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn v4(s: &str) -> Subnet {
        s.parse().unwrap()
    }

    fn v6(s: &str) -> SubnetV6 {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_v4() {
        let subnet = v4("10.0.0.0/24");
        assert_eq!(subnet.addr(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(subnet.prefix(), 24);
        assert_eq!(subnet.size(), 256);
        assert_eq!(subnet.to_string(), "10.0.0.0/24");

        assert_eq!(v4("10.0.0.7"), v4("10.0.0.7/32"));
        assert_eq!(v4("0.0.0.0/0").size(), 1 << 32);
    }

    #[test]
    fn test_parse_v4_rejects() {
        assert!(matches!(
            "10.0.0.1/24".parse::<Subnet>(),
            Err(SubnetParseError::HostBitsSet { .. })
        ));
        assert!(matches!(
            "10.0.0.0/33".parse::<Subnet>(),
            Err(SubnetParseError::PrefixOutOfRange { max: 32, .. })
        ));
        assert!(matches!(
            "10.0.0.0/x".parse::<Subnet>(),
            Err(SubnetParseError::InvalidFormat { .. })
        ));
        assert!(matches!(
            "fd42::/24".parse::<Subnet>(),
            Err(SubnetParseError::InvalidFormat { .. })
        ));
        assert!(Subnet::new(Ipv4Addr::new(10, 0, 0, 1), 31).is_err());
    }

    #[test]
    fn test_parse_v6() {
        let subnet = v6("fd42::/112");
        assert_eq!(subnet.prefix(), 112);
        assert_eq!(subnet.size(), 65536);
        assert_eq!(subnet.to_string(), "fd42::/112");
        assert_eq!(v6("fd42::1"), v6("fd42::1/128"));
        assert_eq!(v6("::/0").size(), u128::MAX);

        assert!(matches!(
            "fd42::1/64".parse::<SubnetV6>(),
            Err(SubnetParseError::HostBitsSet { .. })
        ));
        assert!(matches!(
            "fd42::/129".parse::<SubnetV6>(),
            Err(SubnetParseError::PrefixOutOfRange { max: 128, .. })
        ));
    }

    #[test]
    fn test_ordering() {
        let mut subnets = vec![v4("10.0.0.1/32"), v4("10.0.0.0/25"), v4("10.0.0.0/24")];
        subnets.sort();
        assert_eq!(
            subnets,
            vec![v4("10.0.0.0/24"), v4("10.0.0.0/25"), v4("10.0.0.1/32")]
        );
    }

    #[test]
    fn test_contains_and_overlaps() {
        let net = v4("10.0.0.0/30");

        assert!(net.contains(&v4("10.0.0.0/30")));
        assert!(net.contains(&v4("10.0.0.2/31")));
        assert!(net.contains(&v4("10.0.0.3")));
        assert!(!net.contains(&v4("10.0.0.4")));
        assert!(!net.contains(&v4("10.0.0.0/29")));

        assert!(net.overlaps(&v4("10.0.0.0/29")));
        assert!(v4("10.0.0.1/32").overlaps(&net));
        assert!(!net.overlaps(&v4("10.0.0.4/30")));
    }

    #[test]
    fn test_split_and_siblings() {
        let (lower, upper) = v4("10.0.0.0/24").split().unwrap();
        assert_eq!(lower, v4("10.0.0.0/25"));
        assert_eq!(upper, v4("10.0.0.128/25"));
        assert_eq!(lower.sibling(), Some(upper));
        assert_eq!(upper.sibling(), Some(lower));
        assert_eq!(upper.parent(), Some(v4("10.0.0.0/24")));

        assert!(v4("10.0.0.1").split().is_none());
        assert!(v4("0.0.0.0/0").sibling().is_none());
        assert_eq!(v6("fd42::1").sibling(), Some(v6("fd42::")));
    }

    #[test]
    fn test_hosts() {
        let hosts: Vec<Subnet> = v4("10.0.0.0/30").hosts().collect();
        assert_eq!(
            hosts,
            vec![v4("10.0.0.0"), v4("10.0.0.1"), v4("10.0.0.2"), v4("10.0.0.3")]
        );

        // lazy, even for the whole address space
        let first: Vec<SubnetV6> = v6("::/0").hosts().take(2).collect();
        assert_eq!(first, vec![v6("::"), v6("::1")]);

        let last: Vec<Subnet> = v4("255.255.255.254/31").hosts().collect();
        assert_eq!(last.len(), 2);
    }

    #[test]
    fn test_subtract() {
        let rest = v4("10.0.0.0/24").subtract(&v4("10.0.0.5"));
        assert_eq!(
            rest,
            vec![
                v4("10.0.0.0/30"),
                v4("10.0.0.4/32"),
                v4("10.0.0.6/31"),
                v4("10.0.0.8/29"),
                v4("10.0.0.16/28"),
                v4("10.0.0.32/27"),
                v4("10.0.0.64/26"),
                v4("10.0.0.128/25"),
            ]
        );
        assert_eq!(rest.iter().map(|x| x.size()).sum::<u128>(), 255);

        assert_eq!(
            v4("10.0.0.0/30").subtract(&v4("10.0.0.4/30")),
            vec![v4("10.0.0.0/30")]
        );
        assert!(v4("10.0.0.0/30").subtract(&v4("10.0.0.0/24")).is_empty());
        assert_eq!(
            v6("fd42::/127").subtract(&v6("fd42::")),
            vec![v6("fd42::1")]
        );
    }

    #[test]
    fn test_ipnet_conversion() {
        let net: Ipv4Net = v4("10.1.0.0/16").into();
        assert_eq!(net.to_string(), "10.1.0.0/16");
        assert_eq!(Subnet::try_from(net).unwrap(), v4("10.1.0.0/16"));

        let net: Ipv6Net = "fd42::1/64".parse().unwrap();
        assert!(SubnetV6::try_from(net).is_err());
    }
}
