/// 已结束的组
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedGroup {
    pub group_id: u64,
    pub subgroup_id: u64,
    pub last_object_id: u64,
}

/// 编码块在传输中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectPosition {
    pub group_id: u64,
    pub subgroup_id: u64,
    pub object_id: u64,
    /// 是否开启了新组
    pub new_group: bool,
    /// 因开启新组而结束的上一个组
    pub closed_group: Option<ClosedGroup>,
}

/// 组游标
///
/// 每条编码管线、每种媒体各一个。关键帧开启新组（组ID加1，对象ID归零，
/// 组头标记清除）；非关键帧留在当前组，对象ID加1。流（重新）开始时清零。
#[derive(Debug, Clone, Default)]
pub struct GroupCursor {
    group_id: u64,
    subgroup_id: u64,
    object_id: u64,
    header_sent: bool,
    started: bool,
}

impl GroupCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_id(&self) -> u64 {
        self.group_id
    }

    pub fn subgroup_id(&self) -> u64 {
        self.subgroup_id
    }

    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    pub fn header_sent(&self) -> bool {
        self.header_sent
    }

    pub fn mark_header_sent(&mut self) {
        self.header_sent = true;
    }

    /// 为下一个编码块分配位置
    pub fn advance(&mut self, keyframe: bool) -> ObjectPosition {
        let mut closed_group = None;
        let mut new_group = false;

        if !self.started {
            // 会话的第一个块总是落在组0
            self.started = true;
            self.group_id = 0;
            self.object_id = 0;
            self.header_sent = false;
            new_group = true;
        } else if keyframe {
            closed_group = Some(ClosedGroup {
                group_id: self.group_id,
                subgroup_id: self.subgroup_id,
                last_object_id: self.object_id,
            });
            self.group_id += 1;
            self.object_id = 0;
            self.header_sent = false;
            new_group = true;
        } else {
            self.object_id += 1;
        }

        ObjectPosition {
            group_id: self.group_id,
            subgroup_id: self.subgroup_id,
            object_id: self.object_id,
            new_group,
            closed_group,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
