pub(crate) mod naming;
