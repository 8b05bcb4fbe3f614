/// Number of value slots in a configuration record.
pub const CONF_LEN: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConfType {
    Trigger = 0,
    Acquisition = 1,
    Channel = 2,
}

impl ConfType {
    pub const ALL: [ConfType; 3] = [ConfType::Trigger, ConfType::Acquisition, ConfType::Channel];

    pub fn name(self) -> &'static str {
        match self {
            ConfType::Trigger => "trigger",
            ConfType::Acquisition => "acquisition",
            ConfType::Channel => "channel",
        }
    }
}

/// Every field a configuration record can carry.
///
/// The discriminant is the slot index inside [`Conf`], and it is also the bit
/// used in the presence mask and in the board capability masks.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ConfField {
    TrgSource = 0,
    TrgSourceChan = 1,
    TrgThreshold = 2,
    TrgPolarity = 3,
    TrgDelay = 4,
    AcqNShots = 6,
    AcqPostSamp = 7,
    AcqPreSamp = 8,
    AcqDecimation = 9,
    AcqFreqHz = 10,
    AcqNBits = 11,
    ChnRange = 13,
    ChnTermination = 14,
    ChnOffset = 15,
}

impl ConfField {
    pub const ALL: [ConfField; 14] = [
        ConfField::TrgSource,
        ConfField::TrgSourceChan,
        ConfField::TrgThreshold,
        ConfField::TrgPolarity,
        ConfField::TrgDelay,
        ConfField::AcqNShots,
        ConfField::AcqPostSamp,
        ConfField::AcqPreSamp,
        ConfField::AcqDecimation,
        ConfField::AcqFreqHz,
        ConfField::AcqNBits,
        ConfField::ChnRange,
        ConfField::ChnTermination,
        ConfField::ChnOffset,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bit(self) -> u64 {
        1 << self.index()
    }

    /// The record type this field naturally belongs to.
    pub fn conf_type(self) -> ConfType {
        match self.index() {
            0..=5 => ConfType::Trigger,
            6..=12 => ConfType::Acquisition,
            _ => ConfType::Channel,
        }
    }

    pub fn from_index(index: usize) -> Option<ConfField> {
        ConfField::ALL.into_iter().find(|f| f.index() == index)
    }
}

/// A typed configuration record: one value slot per field plus a presence mask.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Conf {
    pub kind: ConfType,
    /// Sub-element the record targets, i.e. the channel for channel records.
    pub route_to: u32,
    mask: u64,
    values: [u32; CONF_LEN],
}

impl Conf {
    pub fn new(kind: ConfType) -> Self {
        Self {
            kind,
            route_to: 0,
            mask: 0,
            values: [0; CONF_LEN],
        }
    }

    pub fn routed(kind: ConfType, route_to: u32) -> Self {
        Self {
            route_to,
            ..Self::new(kind)
        }
    }

    /// Store a value and mark the field present.
    pub fn set(&mut self, field: ConfField, value: u32) {
        self.values[field.index()] = value;
        self.mask |= field.bit();
    }

    /// Mark a field present without touching its value; used to build a
    /// retrieve request.
    pub fn request(&mut self, field: ConfField) {
        self.mask |= field.bit();
    }

    pub fn clear(&mut self, field: ConfField) {
        self.mask &= !field.bit();
    }

    pub fn is_present(&self, field: ConfField) -> bool {
        self.mask & field.bit() != 0
    }

    pub fn get(&self, field: ConfField) -> Option<u32> {
        self.is_present(field).then(|| self.values[field.index()])
    }

    /// Value slot regardless of presence (zero when never set).
    pub fn value(&self, field: ConfField) -> u32 {
        self.values[field.index()]
    }

    pub(crate) fn store(&mut self, field: ConfField, value: u32) {
        self.values[field.index()] = value;
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Present fields, in slot order.
    pub fn present(&self) -> impl Iterator<Item = ConfField> + '_ {
        ConfField::ALL.into_iter().filter(|f| self.is_present(*f))
    }

    /// Copy every present field of `other` into `self`, overriding values.
    pub fn merge(&mut self, other: &Conf) {
        for field in other.present() {
            self.set(field, other.value(field));
        }
        self.route_to = other.route_to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_set_fields_are_present() {
        let mut conf = Conf::new(ConfType::Acquisition);
        assert!(conf.is_empty());
        conf.set(ConfField::AcqNShots, 3);
        assert_eq!(conf.get(ConfField::AcqNShots), Some(3));
        assert_eq!(conf.get(ConfField::AcqPreSamp), None);
        assert_eq!(conf.present().collect::<Vec<_>>(), vec![ConfField::AcqNShots]);

        conf.clear(ConfField::AcqNShots);
        assert!(conf.is_empty());
        assert_eq!(conf.value(ConfField::AcqNShots), 3);
    }

    #[test]
    fn fields_map_to_their_type() {
        assert_eq!(ConfField::TrgDelay.conf_type(), ConfType::Trigger);
        assert_eq!(ConfField::AcqNBits.conf_type(), ConfType::Acquisition);
        assert_eq!(ConfField::ChnOffset.conf_type(), ConfType::Channel);
        assert_eq!(ConfField::from_index(7), Some(ConfField::AcqPostSamp));
        assert_eq!(ConfField::from_index(5), None);
    }

    #[test]
    fn merge_overrides_present_fields_only() {
        let mut base = Conf::new(ConfType::Trigger);
        base.set(ConfField::TrgSource, 1);
        base.set(ConfField::TrgThreshold, 100);

        let mut update = Conf::new(ConfType::Trigger);
        update.set(ConfField::TrgThreshold, 250);
        base.merge(&update);

        assert_eq!(base.get(ConfField::TrgSource), Some(1));
        assert_eq!(base.get(ConfField::TrgThreshold), Some(250));
    }
}
