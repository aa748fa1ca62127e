//! Network interfaces of a node.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::Serialize;

/// Number of NIC slots of every node.
pub const NIC_SLOTS: usize = 32;

/// Fields of a NIC settable from a cluster file or the discovery probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicField {
    Pci,
    Mac,
    Ip,
    Ifname,
    Speed,
    Mask,
}

impl NicField {
    pub const ALL: [NicField; 6] = [
        NicField::Pci,
        NicField::Mac,
        NicField::Ip,
        NicField::Ifname,
        NicField::Speed,
        NicField::Mask,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NicField::Pci => "pci",
            NicField::Mac => "mac",
            NicField::Ip => "ip",
            NicField::Ifname => "ifname",
            NicField::Speed => "speed",
            NicField::Mask => "mask",
        }
    }
}

impl FromStr for NicField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NicField::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_owned())
    }
}

impl fmt::Display for NicField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One network interface slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Nic {
    pub index: usize,
    pub mac: String,
    pub ip: String,
    pub ifname: String,
    pub pci: String,
    /// Link speed in Mb/s, when known.
    pub speed: Option<u64>,
    pub mask: String,
}

impl Nic {
    pub fn new(
        index: usize,
        mac: impl Into<String>,
        ip: impl Into<String>,
        ifname: impl Into<String>,
    ) -> Self {
        Self {
            index,
            mac: mac.into(),
            ip: ip.into(),
            ifname: ifname.into(),
            pci: String::new(),
            speed: None,
            mask: String::new(),
        }
    }

    /// A placeholder NIC with a locally administered MAC and a matching
    /// `10.x.y.z` address.
    pub fn random<R: Rng + ?Sized>(index: usize, rng: &mut R) -> Self {
        let tail: [u8; 3] = [
            rng.gen_range(0x01..=0x7f),
            rng.gen_range(0x01..=0xff),
            rng.gen_range(0x01..=0xfe),
        ];
        let mac = format!("ae:aa:aa:{:02x}:{:02x}:{:02x}", tail[0], tail[1], tail[2]);
        let ip = format!("10.{}.{}.{}", tail[0], tail[1], tail[2]);
        Self::new(index, mac, ip, format!("eth{index}"))
    }

    /// `NIC_SLOTS` random NICs indexed from 0.
    pub fn random_slots() -> Vec<Nic> {
        let mut rng = rand::thread_rng();
        (0..NIC_SLOTS).map(|i| Nic::random(i, &mut rng)).collect()
    }

    /// Read one field as text. An unknown speed reads as an empty string.
    pub fn get(&self, field: NicField) -> String {
        match field {
            NicField::Pci => self.pci.clone(),
            NicField::Mac => self.mac.clone(),
            NicField::Ip => self.ip.clone(),
            NicField::Ifname => self.ifname.clone(),
            NicField::Speed => self.speed.map(|s| s.to_string()).unwrap_or_default(),
            NicField::Mask => self.mask.clone(),
        }
    }

    /// Set one field from text. Fails only on a non numeric speed.
    pub fn set(&mut self, field: NicField, value: &str) -> Result<(), std::num::ParseIntError> {
        let value = value.trim();
        match field {
            NicField::Pci => self.pci = value.to_owned(),
            NicField::Mac => self.mac = value.to_owned(),
            NicField::Ip => self.ip = value.to_owned(),
            NicField::Ifname => self.ifname = value.to_owned(),
            NicField::Speed => self.speed = Some(value.parse()?),
            NicField::Mask => self.mask = value.to_owned(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn should_generate_matching_mac_and_ip() {
        let mut rng = StdRng::seed_from_u64(7);
        let nic = Nic::random(3, &mut rng);
        assert!(nic.mac.starts_with("ae:aa:aa:"));
        assert!(nic.ip.starts_with("10."));
        assert_eq!(nic.ifname, "eth3");

        let mac_tail: Vec<u8> = nic.mac.split(':').skip(3).map(|b| u8::from_str_radix(b, 16).unwrap()).collect();
        let ip_tail: Vec<u8> = nic.ip.split('.').skip(1).map(|b| b.parse().unwrap()).collect();
        assert_eq!(mac_tail, ip_tail);
        assert!(mac_tail[0] >= 1 && mac_tail[0] <= 0x7f);
        assert_ne!(mac_tail[2], 0xff);
    }

    #[test]
    fn should_seed_all_slots() {
        let nics = Nic::random_slots();
        assert_eq!(nics.len(), NIC_SLOTS);
        assert!(nics.iter().enumerate().all(|(i, n)| n.index == i));
    }

    #[test]
    fn should_parse_field_names_case_insensitively() {
        assert_eq!("IFNAME".parse::<NicField>(), Ok(NicField::Ifname));
        assert_eq!("mask".parse::<NicField>(), Ok(NicField::Mask));
        assert!("vlan".parse::<NicField>().is_err());
    }

    #[test]
    fn should_set_and_get_fields() {
        let mut nic = Nic::new(0, "", "", "eth0");
        nic.set(NicField::Ip, "192.168.1.2").unwrap();
        nic.set(NicField::Speed, "100000").unwrap();
        assert_eq!(nic.get(NicField::Ip), "192.168.1.2");
        assert_eq!(nic.speed, Some(100_000));
        assert!(nic.set(NicField::Speed, "fast").is_err());
    }
}
